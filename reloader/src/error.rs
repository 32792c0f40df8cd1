use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required environment variable {0}")]
    MissingVariable(&'static str),

    #[error("invalid value for {name}: {reason}")]
    InvalidVariable { name: &'static str, reason: String },

    #[error("failed to list s3://{bucket}/{prefix}: {message}")]
    StorageAccess {
        bucket: String,
        prefix: String,
        message: String,
    },

    #[error("failed to read partitions of table {table}")]
    RegistryQuery {
        table: String,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to submit query: {0}")]
    QuerySubmission(String),

    #[error("query {id} finished {state}: {reason}")]
    QueryExecution {
        id: String,
        state: String,
        reason: String,
    },

    #[error("query {id} still {state} after {attempts} attempt(s)")]
    QueryTimeout {
        id: String,
        state: String,
        attempts: u32,
    },

    #[error("invocation deadline reached before the query was submitted")]
    DeadlineReached,
}
