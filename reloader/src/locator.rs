use crate::error::{Error, Result};
use crate::partition::{is_digits, is_region, LogLayout, PartitionCoordinate};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::ExpirationStatus;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const NO_LIFECYCLE: &str = "NoSuchLifecycleConfiguration";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All `/`-delimited common prefixes directly below `prefix`, every page included.
    async fn common_prefixes(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Shortest expiration in days among the bucket's enabled lifecycle rules.
    async fn lifecycle_expiration_days(&self, bucket: &str) -> Result<Option<u32>>;
}

pub struct S3Store {
    client: s3::Client,
}

impl S3Store {
    pub fn new(client: s3::Client) -> Self {
        S3Store { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn common_prefixes(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/")
            .into_paginator()
            .send();
        let mut prefixes = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| Error::StorageAccess {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;
            for common in page.common_prefixes() {
                if let Some(p) = common.prefix() {
                    prefixes.push(p.to_string());
                }
            }
        }
        Ok(prefixes)
    }

    async fn lifecycle_expiration_days(&self, bucket: &str) -> Result<Option<u32>> {
        let resp = match self
            .client
            .get_bucket_lifecycle_configuration()
            .bucket(bucket)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.code() == Some(NO_LIFECYCLE) => return Ok(None),
            Err(e) => {
                return Err(Error::StorageAccess {
                    bucket: bucket.to_string(),
                    prefix: String::new(),
                    message: DisplayErrorContext(&e).to_string(),
                })
            }
        };
        let days = resp
            .rules()
            .iter()
            .filter(|rule| *rule.status() == ExpirationStatus::Enabled)
            .filter_map(|rule| rule.expiration().and_then(|e| e.days()))
            .filter(|days| *days > 0)
            .min()
            .map(|days| days as u32);
        Ok(days)
    }
}

/// Walks `root/<region>/<year>/<month>/<day>/` one level at a time.
///
/// Regions come from whatever exists under the root, so a newly enabled
/// region shows up without any configuration change.
pub async fn locate<S: ObjectStore>(store: &S, layout: &LogLayout) -> Result<BTreeSet<PartitionCoordinate>> {
    let bucket = layout.bucket.as_str();
    let mut found = BTreeSet::new();

    for region in children(store, bucket, &layout.root_prefix(), is_region).await? {
        let region_prefix = format!("{}{}/", layout.root_prefix(), region);
        for year in children(store, bucket, &region_prefix, |s| is_digits(s, 4)).await? {
            let year_prefix = format!("{}{}/", region_prefix, year);
            for month in children(store, bucket, &year_prefix, |s| is_digits(s, 2)).await? {
                let month_prefix = format!("{}{}/", year_prefix, month);
                for day in children(store, bucket, &month_prefix, |s| is_digits(s, 2)).await? {
                    if let Some(c) = PartitionCoordinate::new(&region, &year, &month, &day) {
                        found.insert(c);
                    }
                }
            }
        }
    }

    info!(bucket, partitions = found.len(), "located partitions");
    Ok(found)
}

async fn children<S, F>(store: &S, bucket: &str, prefix: &str, accept: F) -> Result<Vec<String>>
where
    S: ObjectStore,
    F: Fn(&str) -> bool,
{
    let mut names = Vec::new();
    for p in store.common_prefixes(bucket, prefix).await? {
        let name = p
            .strip_prefix(prefix)
            .map(|rest| rest.trim_end_matches('/'))
            .unwrap_or_default();
        if accept(name) {
            names.push(name.to_string());
        } else {
            debug!(prefix = %p, "skipping unexpected prefix");
        }
    }
    Ok(names)
}

/// Resolves the retention window from the bucket's lifecycle rules.
pub async fn lifecycle_days<S: ObjectStore>(store: &S, bucket: &str) -> Result<Option<u32>> {
    let days = store.lifecycle_expiration_days(bucket).await?;
    if days.is_none() {
        warn!(bucket, "bucket has no expiring lifecycle rule, skipping partition expiry");
    }
    Ok(days)
}
