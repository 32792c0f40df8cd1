use crate::config::TableIdentity;
use crate::error::{Error, Result};
use async_trait::async_trait;
use aws_sdk_athena as athena;
use aws_sdk_athena::error::DisplayErrorContext;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueryState::Succeeded | QueryState::Failed | QueryState::Cancelled)
    }
}

impl Display for QueryState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded => "SUCCEEDED",
            QueryState::Failed => "FAILED",
            QueryState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryStatus {
    pub state: QueryState,
    pub reason: Option<String>,
}

/// The query engine the executor drives. Athena in production.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Submits `sql` and returns the execution id.
    async fn start_query(&self, sql: &str, table: &TableIdentity) -> Result<String>;

    async fn query_status(&self, id: &str) -> Result<QueryStatus>;

    async fn stop_query(&self, id: &str) -> Result<()>;

    /// First column of every result row, across all result pages.
    async fn query_results(&self, id: &str) -> Result<Vec<String>>;
}

/// Time source for polling budgets and the waits between polls.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// Bounded exponential backoff for polling one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total wait allowed for a single submission before it counts as stuck.
    pub timeout: Duration,
    /// Submissions per statement, counting the first one.
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl PollPolicy {
    pub fn interval(&self, poll: u32) -> Duration {
        let factor = 2u32.saturating_pow(poll);
        self.initial_interval
            .checked_mul(factor)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

enum Outcome {
    Done,
    TimedOut(QueryState),
}

pub struct Executor<'a, Q: QueryEngine, C: Clock> {
    engine: &'a Q,
    clock: &'a C,
    table: &'a TableIdentity,
    policy: PollPolicy,
    deadline: Option<Instant>,
}

impl<'a, Q: QueryEngine, C: Clock> Executor<'a, Q, C> {
    pub fn new(engine: &'a Q, clock: &'a C, table: &'a TableIdentity, policy: PollPolicy) -> Self {
        Executor {
            engine,
            clock,
            table,
            policy,
            deadline: None,
        }
    }

    /// No polling or resubmission happens past `deadline`.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn past_deadline(&self) -> bool {
        self.remaining() == Some(Duration::ZERO)
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
    }

    /// Runs `sql` to completion and returns the id of the successful execution.
    pub async fn execute(&self, sql: &str) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let id = self.engine.start_query(sql, self.table).await?;
            info!(
                query_id = %id,
                attempt,
                result = %format!("{}/{}.txt", self.table.output_location.trim_end_matches('/'), id),
                "submitted query"
            );
            match self.wait(&id).await? {
                Outcome::Done => return Ok(id),
                Outcome::TimedOut(state) => {
                    warn!(query_id = %id, attempt, %state, "query timed out, stopping it");
                    if let Err(e) = self.engine.stop_query(&id).await {
                        warn!(query_id = %id, error = %e, "failed to stop query");
                    }
                    if attempt >= attempts || self.past_deadline() {
                        return Err(Error::QueryTimeout {
                            id,
                            state: state.to_string(),
                            attempts: attempt,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn results(&self, id: &str) -> Result<Vec<String>> {
        self.engine.query_results(id).await
    }

    async fn wait(&self, id: &str) -> Result<Outcome> {
        let started = self.clock.now();
        let mut poll = 0;
        loop {
            let status = self.engine.query_status(id).await?;
            debug!(query_id = %id, state = %status.state, "polled query");
            let left = self
                .policy
                .timeout
                .saturating_sub(self.clock.now().saturating_duration_since(started));
            let left = self.remaining().map_or(left, |r| r.min(left));
            if !status.state.is_terminal() && left.is_zero() {
                return Ok(Outcome::TimedOut(status.state));
            }
            match status.state {
                QueryState::Succeeded => return Ok(Outcome::Done),
                QueryState::Failed | QueryState::Cancelled => {
                    return Err(Error::QueryExecution {
                        id: id.to_string(),
                        state: status.state.to_string(),
                        reason: status.reason.unwrap_or_else(|| "no reason given".to_string()),
                    })
                }
                QueryState::Queued | QueryState::Running => {
                    self.clock.sleep(self.policy.interval(poll).min(left)).await;
                    poll += 1;
                }
            }
        }
    }
}

pub struct AthenaEngine {
    client: athena::Client,
}

impl AthenaEngine {
    pub fn new(client: athena::Client) -> Self {
        AthenaEngine { client }
    }
}

#[async_trait]
impl QueryEngine for AthenaEngine {
    async fn start_query(&self, sql: &str, table: &TableIdentity) -> Result<String> {
        let resp = self
            .client
            .start_query_execution()
            .query_string(sql)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&table.database)
                    .catalog(&table.catalog)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&table.output_location)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| Error::QuerySubmission(DisplayErrorContext(&e).to_string()))?;
        resp.query_execution_id()
            .map(str::to_string)
            .ok_or_else(|| Error::QuerySubmission("no execution id returned".to_string()))
    }

    async fn query_status(&self, id: &str) -> Result<QueryStatus> {
        let resp = self
            .client
            .get_query_execution()
            .query_execution_id(id)
            .send()
            .await
            .map_err(|e| Error::QuerySubmission(DisplayErrorContext(&e).to_string()))?;
        let status = resp.query_execution().and_then(|q| q.status());
        let state = match status.and_then(|s| s.state()) {
            Some(QueryExecutionState::Succeeded) => QueryState::Succeeded,
            Some(QueryExecutionState::Failed) => QueryState::Failed,
            Some(QueryExecutionState::Cancelled) => QueryState::Cancelled,
            Some(QueryExecutionState::Running) => QueryState::Running,
            _ => QueryState::Queued,
        };
        let reason = status.and_then(|s| {
            s.athena_error()
                .and_then(|e| e.error_message())
                .or(s.state_change_reason())
                .map(str::to_string)
        });
        Ok(QueryStatus { state, reason })
    }

    async fn stop_query(&self, id: &str) -> Result<()> {
        self.client
            .stop_query_execution()
            .query_execution_id(id)
            .send()
            .await
            .map_err(|e| Error::QuerySubmission(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn query_results(&self, id: &str) -> Result<Vec<String>> {
        let mut pages = self
            .client
            .get_query_results()
            .query_execution_id(id)
            .into_paginator()
            .send();
        let mut values = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| Error::QueryExecution {
                id: id.to_string(),
                state: QueryState::Succeeded.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;
            if let Some(result_set) = page.result_set() {
                for row in result_set.rows() {
                    if let Some(v) = row.data().first().and_then(|d| d.var_char_value()) {
                        values.push(v.to_string());
                    }
                }
            }
        }
        Ok(values)
    }
}
