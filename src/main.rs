use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    let cli = archivebook::cli::Cli::parse();
    archivebook::logging::init(&cli.log_level).context("init logging")?;
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        archivebook::cli::Command::Run(args) => {
            archivebook::pipeline::run(args).await.context("run")?;
        }
        archivebook::cli::Command::Cache {
            command: archivebook::cli::CacheCommand::Clear(args),
        } => {
            archivebook::pipeline::clear_cache(args).context("cache clear")?;
        }
        archivebook::cli::Command::Cache {
            command: archivebook::cli::CacheCommand::Stats(args),
        } => {
            archivebook::pipeline::cache_stats(args).context("cache stats")?;
        }
    }

    Ok(())
}
