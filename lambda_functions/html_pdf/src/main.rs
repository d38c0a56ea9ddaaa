use std::sync::Arc;

use aws_config::BehaviorVersion;
use html_pdf::{function_handler, ChromeRenderer, Config, Converter, S3Store};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .without_time()
        .init();

    let config = Config::from_env()?;
    config.log_summary();

    // region and credentials come from the Lambda environment
    let aws_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let store = S3Store::new(aws_sdk_s3::Client::new(&aws_config));
    let renderer = ChromeRenderer::new(config.chrome.clone());

    let converter = Converter::new(config, Arc::new(store), Arc::new(renderer));
    let converter_ref = &converter;

    run(service_fn(move |event: LambdaEvent<_>| async move {
        function_handler(event, converter_ref).await
    }))
    .await
}
