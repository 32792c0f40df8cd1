use lambda_runtime::{run, service_fn, Error};
use std::env;

const TRACING_DEBUG: &str = "TRACING_DEBUG";

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(match env::var(TRACING_DEBUG) {
            Ok(_) => tracing::Level::DEBUG,
            Err(_) => tracing::Level::INFO,
        })
        // CloudWatch stamps every line with its ingestion time.
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(reloader::function_handler)).await
}
