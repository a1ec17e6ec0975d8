//! tickoff - a local todo list in the terminal
//!
//! Usage:
//!   tickoff                         Open the list in ./tickoff-data
//!   tickoff --data-dir ~/todos      Use another data directory
//!   tickoff --config tickoff.json   Read settings from a file first
//!   tickoff --no-indexed            Keep the list in the flat store only

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tickoff_core::environment::SystemClock;
use tickoff_storage::{MigrationReport, open_session};
use tickoff_todo::repl::HELP;
use tickoff_todo::{
    Command, Controller, TerminalView, TodoAction, TodoConfig, TodoStore, TodoView,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tickoff")]
#[command(author, version, about = "Local todo list")]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the todo data [default: ./tickoff-data]
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Database file name inside the data directory [default: todos.db]
    #[arg(long, value_name = "FILE")]
    database_file: Option<PathBuf>,

    /// Do not use the indexed store
    #[arg(long)]
    no_indexed: bool,

    /// Do not use the flat store
    #[arg(long)]
    no_flat: bool,

    /// Search quiet period in milliseconds [default: 300]
    #[arg(long, value_name = "MS")]
    debounce_ms: Option<u64>,
}

impl Cli {
    /// Layer the flags that were given over `config`
    fn apply(self, mut config: TodoConfig) -> TodoConfig {
        if let Some(dir) = self.data_dir {
            config = config.data_dir(dir);
        }
        if let Some(file) = self.database_file {
            config = config.database_file(file);
        }
        if self.no_indexed {
            config = config.indexed(false);
        }
        if self.no_flat {
            config = config.flat(false);
        }
        if let Some(ms) = self.debounce_ms {
            config = config.debounce_ms(ms);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tickoff=info,tickoff_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tickoff_runtime::metrics::register_metrics();

    let cli = Cli::parse();
    let base = match &cli.config {
        Some(path) => TodoConfig::load(path).await?,
        None => TodoConfig::default(),
    };
    let config = cli.apply(base);
    config.validate().context("invalid configuration")?;
    info!(data_dir = %config.data_dir.display(), "Configuration loaded");

    let session = open_session(config.storage_options().await, Arc::new(SystemClock)).await;
    info!(backend = %session.kind(), "Session opened");

    let mut controller = Controller::new(session.repository, config.debounce());
    if let Some(migration) = session.migration {
        reload_after_migration(migration, controller.store().clone());
    }

    controller.attach(TerminalView::new(std::io::stdout()));
    controller.load().await?;

    run_repl(&controller).await?;

    info!("Shutting down");
    controller.shutdown().await?;
    Ok(())
}

/// Reload the list once the background migration has moved records.
fn reload_after_migration(migration: JoinHandle<MigrationReport>, store: TodoStore) {
    tokio::spawn(async move {
        match migration.await {
            Ok(report) if report.changed() > 0 => {
                info!(
                    migrated = report.migrated,
                    updated = report.updated,
                    failed = report.failed,
                    "Flat store migrated"
                );
                if let Err(error) = store.send(TodoAction::Load).await {
                    warn!(%error, "Could not reload after migration");
                }
            }
            Ok(_) => {}
            Err(error) => warn!(%error, "Migration task failed"),
        }
    });
}

async fn run_repl(controller: &Controller) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(error) => {
                eprintln!("{error}");
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => {
                println!("{HELP}");
                continue;
            }
            Command::List => {
                let model = controller.view_model().await;
                TerminalView::new(std::io::stdout()).render(&model)?;
                continue;
            }
            _ => {}
        }

        let model = controller.view_model().await;
        match command.into_action(&model) {
            Ok(Some(action)) => controller.dispatch(action).await?,
            Ok(None) => {}
            Err(error) => eprintln!("{error}"),
        }
    }

    Ok(())
}
