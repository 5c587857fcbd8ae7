use std::process;

use scopekit::{
    cache::Tag,
    config::{self, CacheCommand, Command, PurgeArgs},
    infra::{InfraError, Runtime, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(error) => {
            report_application_error(&error);
            process::exit(1);
        }
    }
}

fn report_application_error(error: &InfraError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

/// Returns `Ok(false)` when the command ran but reported unhealthy stores.
async fn run() -> Result<bool, InfraError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let runtime = Runtime::from_settings(&settings).await?;

    match cli_args.command {
        Command::Check => Ok(run_check(&runtime).await),
        Command::Cache(args) => match args.command {
            CacheCommand::Purge(purge) => run_purge(&runtime, purge).await.map(|()| true),
        },
    }
}

async fn run_check(runtime: &Runtime) -> bool {
    let report = runtime.check().await;
    let mut healthy = true;
    for health in &report {
        match &health.error {
            None => info!(role = health.role, name = %health.name, "healthy"),
            Some(reason) => {
                healthy = false;
                warn!(role = health.role, name = %health.name, %reason, "unhealthy");
            }
        }
    }
    healthy
}

async fn run_purge(runtime: &Runtime, purge: PurgeArgs) -> Result<(), InfraError> {
    match (purge.prefix, purge.tag) {
        (Some(prefix), None) => {
            let removed = runtime.cache.remove_by_prefix(&prefix).await?;
            info!(%prefix, removed, "cache entries purged");
        }
        (None, Some(tag)) => {
            let tag = Tag::from(tag);
            let removed = runtime.cache.remove_by_tag(&tag).await?;
            info!(%tag, removed, "cache entries purged");
        }
        _ => {
            return Err(InfraError::configuration(
                "exactly one of --prefix or --tag is required",
            ));
        }
    }
    Ok(())
}
