pub mod config;
pub mod error;
pub mod executor;
pub mod locator;
pub mod partition;
pub mod query;
pub mod registry;

use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use aws_sdk_athena as athena;
use aws_sdk_s3 as s3;
use chrono::{DateTime, NaiveDate, Utc};
use lambda_runtime::LambdaEvent;
use serde::Serialize;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{error, info};

pub use config::{Config, Expiration, TableIdentity};
pub use error::{Error, Result};
pub use executor::{AthenaEngine, Clock, Executor, PollPolicy, QueryEngine, TokioClock};
pub use locator::{ObjectStore, S3Store};
pub use partition::{LogLayout, PartitionCoordinate};
pub use query::{Operation, PartitionQuery};

/// Time kept back from the Lambda deadline for the summary and runtime bookkeeping.
const DEADLINE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub located: usize,
    pub added: Vec<PartitionCoordinate>,
    pub dropped: Vec<PartitionCoordinate>,
    pub failed: Vec<PartitionCoordinate>,
    /// Failures that skipped a whole step rather than a single statement.
    pub errors: Vec<String>,
}

/// One pass: add what storage has and the table lacks, then expire old partitions.
///
/// Listing and registry failures abort the pass. Once statements have been
/// submitted, everything else is logged and counted so the summary always comes back.
pub async fn reload_partitions<S, Q, C>(
    config: &Config,
    store: &S,
    engine: &Q,
    clock: &C,
    today: NaiveDate,
    deadline: Option<Instant>,
) -> Result<Summary>
where
    S: ObjectStore,
    Q: QueryEngine,
    C: Clock,
{
    let table = config.table.table.as_str();
    let executor = Executor::new(engine, clock, &config.table, config.poll.clone()).with_deadline(deadline);
    let mut summary = Summary::default();

    let located = locator::locate(store, &config.layout).await?;
    summary.located = located.len();
    let registered = registry::registered(&executor, table).await?;
    let missing = registry::unregistered(&located, &registered);
    info!(table, missing = missing.len(), "partitions missing from table");

    for q in query::add_partitions(table, &config.layout, &missing) {
        submit(&executor, q, &mut summary).await;
    }

    let expiration_days = match config.expiration {
        None => None,
        Some(Expiration::Days(days)) => Some(days),
        Some(Expiration::BucketLifecycle) => match locator::lifecycle_days(store, &config.layout.bucket).await {
            Ok(days) => days,
            Err(e) => {
                error!(table, error = %e, "cannot read bucket lifecycle, skipping partition expiry");
                summary.errors.push(e.to_string());
                None
            }
        },
    };
    if let Some(days) = expiration_days {
        let cutoff = query::retention_cutoff(today, days);
        let expired = query::expired(&registered, cutoff);
        info!(table, %cutoff, expired = expired.len(), "partitions past retention");
        for q in query::drop_partitions(table, &expired) {
            submit(&executor, q, &mut summary).await;
        }
    }

    info!(
        table,
        located = summary.located,
        added = summary.added.len(),
        dropped = summary.dropped.len(),
        failed = summary.failed.len(),
        errors = summary.errors.len(),
        "partition reload finished"
    );
    Ok(summary)
}

async fn submit<Q: QueryEngine, C: Clock>(executor: &Executor<'_, Q, C>, q: PartitionQuery, summary: &mut Summary) {
    let result = if executor.past_deadline() {
        Err(Error::DeadlineReached)
    } else {
        executor.execute(&q.sql).await
    };
    match result {
        Ok(id) => {
            info!(query_id = %id, operation = %q.operation, partitions = q.coordinates.len(), "partition query succeeded");
            match q.operation {
                Operation::Add => summary.added.extend(q.coordinates),
                Operation::Drop => summary.dropped.extend(q.coordinates),
            }
        }
        Err(e) => {
            for c in &q.coordinates {
                error!(operation = %q.operation, partition = %c, error = %e, "partition query failed");
            }
            summary.failed.extend(q.coordinates);
        }
    }
}

/// Converts the runtime's deadline (ms since the epoch) into a local instant,
/// less [`DEADLINE_MARGIN`]. Zero means the runtime gave none.
pub fn invocation_deadline(deadline_ms: u64) -> Option<Instant> {
    if deadline_ms == 0 {
        return None;
    }
    let deadline = UNIX_EPOCH + Duration::from_millis(deadline_ms);
    let left = deadline
        .duration_since(SystemTime::now())
        .unwrap_or_default()
        .saturating_sub(DEADLINE_MARGIN);
    Some(Instant::now() + left)
}

/// Scheduled events fired by hand may carry no time; fall back to the clock.
pub fn event_date(time: DateTime<Utc>) -> NaiveDate {
    if time.timestamp() == 0 {
        Utc::now().date_naive()
    } else {
        time.date_naive()
    }
}

pub async fn function_handler(event: LambdaEvent<CloudWatchEvent>) -> std::result::Result<Summary, lambda_runtime::Error> {
    // nothing touches AWS until the configuration is known to be complete
    let config = Config::from_env()?;
    let today = event_date(event.payload.time);

    let region_provider = RegionProviderChain::default_provider().or_else("us-east-1");
    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await;
    let s3_config = match &config.s3_endpoint {
        Some(endpoint) => s3::config::Builder::from(&aws_config)
            .endpoint_url(endpoint)
            .force_path_style(true)
            .build(),
        None => s3::config::Builder::from(&aws_config).build(),
    };
    let athena_config = match &config.athena_endpoint {
        Some(endpoint) => athena::config::Builder::from(&aws_config).endpoint_url(endpoint).build(),
        None => athena::config::Builder::from(&aws_config).build(),
    };
    let store = S3Store::new(s3::Client::from_conf(s3_config));
    let engine = AthenaEngine::new(athena::Client::from_conf(athena_config));

    let deadline = invocation_deadline(event.context.deadline);
    let summary = reload_partitions(&config, &store, &engine, &TokioClock, today, deadline).await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch_ms(at: SystemTime) -> u64 {
        at.duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
    }

    #[test]
    fn test_invocation_deadline_keeps_margin() {
        assert_eq!(invocation_deadline(0), None);

        let before = Instant::now();
        let deadline = invocation_deadline(epoch_ms(SystemTime::now() + Duration::from_secs(60))).unwrap();
        assert!(deadline <= Instant::now() + Duration::from_secs(55));
        assert!(deadline >= before + Duration::from_secs(53));

        // already expired
        let past = invocation_deadline(epoch_ms(SystemTime::now() - Duration::from_secs(1))).unwrap();
        assert!(past <= Instant::now());
    }
}
