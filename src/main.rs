//! Command-line front end for route-risk-orchestrator
//!
//! ```text
//! route-risk [--config pipeline.toml] <request.json | ->
//! route-risk --schema
//! ```
//!
//! Reads a route-planning request, assesses every path and prints the
//! response as JSON on stdout.
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json`: structured JSON logs (overrides the config file)
//! - `RUST_LOG=info`: log level filter
//! - `ROUTE_RISK_CREDENTIALS=a,b,c`: provider credentials

use route_risk_orchestrator::config::{self, loader, PipelineConfig};
use route_risk_orchestrator::{init_tracing, init_tracing_with, metrics, RouteProcessor};
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

const USAGE: &str = "usage: route-risk [--config <file.toml>] <request.json | ->\n       route-risk --schema";

struct Args {
    config: Option<PathBuf>,
    request: Option<String>,
    schema: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        config: None,
        request: None,
        schema: false,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter.next().ok_or("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--schema" => args.schema = true,
            "--help" | "-h" => return Err(USAGE.to_string()),
            other if args.request.is_none() => args.request = Some(other.to_string()),
            other => return Err(format!("unexpected argument '{other}'\n{USAGE}")),
        }
    }
    Ok(args)
}

fn read_request(source: &str) -> std::io::Result<String> {
    if source == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        Ok(body)
    } else {
        std::fs::read_to_string(source)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args()?;

    if args.schema {
        println!("{}", config::export_schema()?);
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => loader::load_from_file(path)?,
        None => loader::load_from_str("", "<defaults>")?,
    };
    init_logging(&config);

    if config.observability.metrics {
        metrics::init_metrics()?;
    }

    let source = args.request.ok_or(USAGE)?;
    let body: serde_json::Value = serde_json::from_str(&read_request(&source)?)?;

    let processor = RouteProcessor::from_config(&config)?;
    let response = processor.process_request_json(body).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);

    let summary = metrics::get_metrics_summary();
    info!(
        provider_calls = summary.provider_calls.values().sum::<u64>(),
        degraded = summary.degraded.values().sum::<u64>(),
        "done"
    );
    Ok(())
}

fn init_logging(config: &PipelineConfig) {
    // An explicit LOG_FORMAT wins over the config file.
    let _ = if std::env::var_os("LOG_FORMAT").is_some() {
        init_tracing()
    } else {
        init_tracing_with(config.observability.log_format)
    };
}
