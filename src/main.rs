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
    dotenvy::dotenv().ok();
    shelfsync::logging::init().context("init logging")?;

    let cli = shelfsync::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        shelfsync::cli::Command::Build(args) => {
            shelfsync::build::run(args).await.context("build")?;
        }
        shelfsync::cli::Command::Crawl(args) => {
            shelfsync::extract::run(args).await.context("crawl")?;
        }
        shelfsync::cli::Command::Translate(args) => {
            shelfsync::translate::run(args).await.context("translate")?;
        }
        shelfsync::cli::Command::Resolve(args) => {
            shelfsync::resolve::run(args).await.context("resolve")?;
        }
        shelfsync::cli::Command::Publish(args) => {
            shelfsync::publish::run(args).await.context("publish")?;
        }
    }

    Ok(())
}
