use anyhow::Context;
use clap::Parser;
use colored::*;
use fractal_matrix::cli::{App, Cli};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logs to stderr, plus a daily rolling file when `FRACTAL_LOG_DIR` is set.
///
/// The returned guard must stay alive for the file writer to flush.
fn init_logging() -> Option<WorkerGuard> {
    let (file_layer, guard) = match std::env::var("FRACTAL_LOG_DIR") {
        Ok(dir) if !dir.is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "fractal.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        },
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let _guard = init_logging();

    let cli = Cli::parse();
    let app = App::new().context("Failed to initialize application")?;
    info!("Initialized fractal {}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = app.run(cli).await {
        error!("Command execution failed: {:?}", e);
        eprintln!("{} {}", "Error:".red(), e.to_string().red());
        std::process::exit(1);
    }
    Ok(())
}
