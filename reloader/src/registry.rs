use crate::error::{Error, Result};
use crate::executor::{Clock, Executor, QueryEngine};
use crate::partition::PartitionCoordinate;
use crate::query;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Reads the table's registered partitions with a single `SHOW PARTITIONS`.
pub async fn registered<Q, C>(executor: &Executor<'_, Q, C>, table: &str) -> Result<BTreeSet<PartitionCoordinate>>
where
    Q: QueryEngine,
    C: Clock,
{
    let read = async {
        let id = executor.execute(&query::show_partitions(table)).await?;
        executor.results(&id).await
    };
    let rows = read.await.map_err(|e| Error::RegistryQuery {
        table: table.to_string(),
        source: Box::new(e),
    })?;

    let mut partitions = BTreeSet::new();
    for row in rows {
        match PartitionCoordinate::from_partition_spec(&row) {
            Some(c) => {
                partitions.insert(c);
            }
            None => debug!(row = %row, "ignoring partition row"),
        }
    }
    info!(table, partitions = partitions.len(), "read registered partitions");
    Ok(partitions)
}

/// Candidates with no exact four-key match in the registry.
pub fn unregistered(
    candidates: &BTreeSet<PartitionCoordinate>,
    registered: &BTreeSet<PartitionCoordinate>,
) -> BTreeSet<PartitionCoordinate> {
    candidates.difference(registered).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TableIdentity;
    use crate::executor::{PollPolicy, QueryState, QueryStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    fn c(r: &str, y: &str, m: &str, d: &str) -> PartitionCoordinate {
        PartitionCoordinate::new(r, y, m, d).unwrap()
    }

    struct ShowPartitions {
        rows: Vec<String>,
        fail: bool,
        sql: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryEngine for ShowPartitions {
        async fn start_query(&self, sql: &str, _table: &TableIdentity) -> Result<String> {
            self.sql.lock().unwrap().push(sql.to_string());
            Ok("show-1".to_string())
        }

        async fn query_status(&self, _id: &str) -> Result<QueryStatus> {
            Ok(QueryStatus {
                state: if self.fail { QueryState::Failed } else { QueryState::Succeeded },
                reason: Some("Table not found".to_string()),
            })
        }

        async fn stop_query(&self, _id: &str) -> Result<()> {
            Ok(())
        }

        async fn query_results(&self, _id: &str) -> Result<Vec<String>> {
            Ok(self.rows.clone())
        }
    }

    struct StillClock(Instant);

    #[async_trait]
    impl Clock for StillClock {
        fn now(&self) -> Instant {
            self.0
        }

        async fn sleep(&self, _duration: Duration) {}
    }

    fn table() -> TableIdentity {
        TableIdentity {
            database: "test".to_string(),
            catalog: "AwsDataCatalog".to_string(),
            table: "foo".to_string(),
            output_location: "s3://test/foo/bar".to_string(),
        }
    }

    #[test]
    fn test_unregistered_requires_exact_match() {
        let registered: BTreeSet<_> = [c("us-east-1", "2020", "03", "30")].into_iter().collect();
        let candidates: BTreeSet<_> = [
            c("us-east-1", "2020", "03", "30"),
            c("us-east-1", "2020", "03", "31"),
            c("us-west-2", "2020", "03", "30"),
        ]
        .into_iter()
        .collect();

        let missing = unregistered(&candidates, &registered);
        let expected: BTreeSet<_> = [c("us-east-1", "2020", "03", "31"), c("us-west-2", "2020", "03", "30")]
            .into_iter()
            .collect();
        assert_eq!(missing, expected);
    }

    #[tokio::test]
    async fn test_registered_runs_one_query() {
        let engine = ShowPartitions {
            rows: vec![
                "region=us-east-1/year=2020/month=03/day=30".to_string(),
                "region=us-west-2/year=2020/month=04/day=25".to_string(),
            ],
            fail: false,
            sql: Mutex::new(vec![]),
        };
        let table = table();
        let clock = StillClock(Instant::now());
        let executor = Executor::new(&engine, &clock, &table, PollPolicy::default());

        let registered = registered(&executor, "foo").await.unwrap();
        let expected: BTreeSet<_> = [c("us-east-1", "2020", "03", "30"), c("us-west-2", "2020", "04", "25")]
            .into_iter()
            .collect();
        assert_eq!(registered, expected);
        assert_eq!(*engine.sql.lock().unwrap(), vec!["SHOW PARTITIONS `foo`"]);
    }

    #[tokio::test]
    async fn test_failed_registry_read_is_wrapped() {
        let engine = ShowPartitions {
            rows: vec![],
            fail: true,
            sql: Mutex::new(vec![]),
        };
        let table = table();
        let clock = StillClock(Instant::now());
        let executor = Executor::new(&engine, &clock, &table, PollPolicy::default());

        let err = registered(&executor, "foo").await.unwrap_err();
        assert!(matches!(err, Error::RegistryQuery { .. }));
    }
}
