use crate::error::{Error, Result};
use crate::executor::PollPolicy;
use crate::partition::LogLayout;
use std::env;
use std::time::Duration;

const BUCKET: &str = "BUCKET";
const LOG_LOCATION: &str = "LOG_LOCATION";
const ACCOUNT_ID: &str = "ACCOUNT_ID";
const DATABASE: &str = "DATABASE";
const TABLE_NAME: &str = "TABLE_NAME";
const OUTPUT_LOC: &str = "OUTPUT_LOC";
const CATALOG: &str = "CATALOG";
const EXPIRATION_DAYS: &str = "EXPIRATION_DAYS";
const QUERY_TIMEOUT_SECS: &str = "QUERY_TIMEOUT_SECS";
const QUERY_MAX_ATTEMPTS: &str = "QUERY_MAX_ATTEMPTS";
const S3_ENDPOINT: &str = "S3_ENDPOINT";
const ATHENA_ENDPOINT: &str = "ATHENA_ENDPOINT";

const DEFAULT_CATALOG: &str = "AwsDataCatalog";
const LIFECYCLE: &str = "lifecycle";

/// Where the table lives and where Athena writes query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentity {
    pub database: String,
    pub catalog: String,
    pub table: String,
    pub output_location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    Days(u32),
    /// Use the shortest expiration of the bucket's enabled lifecycle rules.
    BucketLifecycle,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub layout: LogLayout,
    pub table: TableIdentity,
    pub expiration: Option<Expiration>,
    pub poll: PollPolicy,
    pub s3_endpoint: Option<String>,
    pub athena_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &'static str| optional(name).ok_or(Error::MissingVariable(name));

        let bucket = required(BUCKET)?;
        let log_location = required(LOG_LOCATION)?.trim_matches('/').to_string();
        if log_location.is_empty() {
            return Err(invalid(LOG_LOCATION, "must not be only slashes"));
        }
        let account_id = required(ACCOUNT_ID)?;
        if !account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(ACCOUNT_ID, "must be numeric"));
        }

        let database = identifier(DATABASE, required(DATABASE)?, false)?;
        let table = identifier(TABLE_NAME, required(TABLE_NAME)?, false)?;
        let catalog = identifier(CATALOG, optional(CATALOG).unwrap_or_else(|| DEFAULT_CATALOG.to_string()), true)?;
        let output_location = required(OUTPUT_LOC)?;
        if !output_location.starts_with("s3://") {
            return Err(invalid(OUTPUT_LOC, "must be an s3:// URI"));
        }

        let expiration = match optional(EXPIRATION_DAYS) {
            None => None,
            Some(v) if v.eq_ignore_ascii_case(LIFECYCLE) => Some(Expiration::BucketLifecycle),
            Some(v) => Some(Expiration::Days(positive(EXPIRATION_DAYS, &v)?)),
        };

        let mut poll = PollPolicy::default();
        if let Some(v) = optional(QUERY_TIMEOUT_SECS) {
            poll.timeout = Duration::from_secs(positive(QUERY_TIMEOUT_SECS, &v)? as u64);
        }
        if let Some(v) = optional(QUERY_MAX_ATTEMPTS) {
            poll.max_attempts = positive(QUERY_MAX_ATTEMPTS, &v)?;
        }

        Ok(Config {
            layout: LogLayout {
                bucket,
                log_location,
                account_id,
            },
            table: TableIdentity {
                database,
                catalog,
                table,
                output_location,
            },
            expiration,
            poll,
            s3_endpoint: optional(S3_ENDPOINT),
            athena_endpoint: optional(ATHENA_ENDPOINT),
        })
    }
}

fn invalid(name: &'static str, reason: &str) -> Error {
    Error::InvalidVariable {
        name,
        reason: reason.to_string(),
    }
}

fn identifier(name: &'static str, value: String, allow_dash: bool) -> Result<String> {
    let ok = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-'));
    if ok {
        Ok(value)
    } else {
        Err(Error::InvalidVariable {
            name,
            reason: format!("{:?} is not a valid identifier", value),
        })
    }
}

fn positive(name: &'static str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::InvalidVariable {
            name,
            reason: format!("expected a positive integer, got {:?}", value),
        }),
    }
}
