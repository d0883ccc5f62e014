//! s3-sync binary: mirror S3 prefixes into local directories and build
//! container images from the result.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use s3_sync::aws::AwsClients;
use s3_sync::runner::{Runner, RunnerConfig};
use s3_sync::spec::SyncSpec;

#[derive(Debug, Parser)]
#[command(
    name = "s3-sync",
    version,
    about = "Mirror S3 prefixes into local directories and build container images from them"
)]
struct Cli {
    /// Sync spec as one CSV record of key=value fields; recognized keys:
    /// schedule, region, bucket, prefix, dst, on-start. Repeatable.
    #[arg(long = "sync", value_name = "SPEC", required = true)]
    sync: Vec<SyncSpec>,

    /// Tag of a container image to build and push to a registry after a
    /// sync produces a change. Repeatable.
    #[arg(long = "image-tag", value_name = "TAG")]
    image_tag: Vec<String>,

    /// Run every sync once, build once, then exit.
    #[arg(long)]
    oneshot: bool,

    /// How long to wait for in-flight jobs on shutdown before cancelling
    /// them.
    #[arg(long, value_name = "DURATION", default_value = "10s", value_parser = humantime::parse_duration)]
    stop_timeout: Duration,

    /// Treat remote keys matching this pattern as link objects that
    /// redirect the effective prefix.
    #[arg(long, value_name = "REGEX")]
    link_pattern: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let link_pattern = match cli.link_pattern.as_deref().map(regex::Regex::new).transpose() {
        Ok(pattern) => pattern,
        Err(e) => {
            error!("invalid --link-pattern: {e}");
            return ExitCode::FAILURE;
        }
    };

    let aws = AwsClients::load().await;
    let config = RunnerConfig {
        specs: cli.sync,
        tags: cli.image_tag,
        stop_timeout: cli.stop_timeout,
        link_pattern,
    };

    let runner = match Runner::new(config, aws) {
        Ok(runner) => runner,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let result = if cli.oneshot {
        runner.run_oneshot().await
    } else {
        runner.run_scheduled().await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
