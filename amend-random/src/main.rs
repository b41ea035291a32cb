#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::sync::Arc;

use amend_random::config::{Cli, RunConfig};
use amend_random::driver;
use amend_random::oracle;
use amend_random::round::RoundController;
use amend_random::store::{MysqlStore, RetryPolicy, Retrying, Store};
use amend_random::time::SystemTimeSource;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn connect(dsn: &str) -> Arc<dyn Store> {
    match MysqlStore::connect(dsn) {
        Ok(store) => Arc::new(Retrying::new(Arc::new(store), RetryPolicy::default())),
        Err(e) => {
            tracing::error!("cannot connect to {dsn}: {e}");
            std::process::exit(2);
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amend_random=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match RunConfig::from_cli(Cli::parse()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    };

    let primary = connect(&config.dsn1);
    let replica = config.dsn2.as_deref().map(connect);

    if config.check_only {
        let Some(replica) = &replica else {
            tracing::error!("check-only mode needs --dsn2");
            std::process::exit(2);
        };
        match oracle::check(primary.as_ref(), Some(replica.as_ref()), &config.table).await {
            Ok(()) => println!("check pass, data same."),
            Err(e) => {
                println!("{e}");
                std::process::exit(1);
            }
        }
        return;
    }

    if config.modes.is_empty() {
        tracing::warn!("no DDL mode selected, rounds only run DML");
    }
    println!("seed: {}", config.seed);
    tracing::info!(
        table = %config.table,
        executor = %config.executor,
        workers = config.dml_threads,
        timeout = ?config.timeout,
        "starting"
    );

    let controller = RoundController::new(config, primary, replica, Arc::new(SystemTimeSource));
    let mut stdout = std::io::stdout();
    let conclusion = match driver::run(&controller, &mut stdout).await {
        Ok(conclusion) => conclusion,
        Err(e) => {
            tracing::error!("cannot write report: {e}");
            std::process::exit(1);
        }
    };
    println!("{conclusion}");
    std::process::exit(conclusion.exit_code());
}
