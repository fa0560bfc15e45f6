use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::{BuildArgs, CrawlArgs, ResolveArgs, TranslateArgs};
use crate::config::{CompletionConfig, SourceConfig};

pub async fn run(args: BuildArgs) -> anyhow::Result<()> {
    SourceConfig::from_env().context("load source config")?;
    CompletionConfig::from_env().context("load completion config")?;
    crate::config::retry_policy_from_env().context("load retry policy")?;

    let workspace_dir = PathBuf::from(&args.out);
    if workspace_dir.exists() {
        anyhow::bail!(
            "workspace output directory already exists: {}",
            workspace_dir.display()
        );
    }
    std::fs::create_dir_all(&workspace_dir)
        .with_context(|| format!("create workspace dir: {}", workspace_dir.display()))?;
    let workspace = workspace_dir.to_string_lossy().to_string();

    tracing::info!(out = %workspace_dir.display(), "build: crawl");
    crate::extract::run(CrawlArgs {
        out: workspace.clone(),
        max_pages: args.max_pages,
        per_page: args.per_page,
        delay_ms: args.delay_ms,
    })
    .await
    .context("crawl")?;

    tracing::info!("build: translate");
    crate::translate::run(TranslateArgs {
        input: workspace.clone(),
        out: workspace.clone(),
        delay_ms: args.translate_delay_ms,
        resume: false,
    })
    .await
    .context("translate")?;

    tracing::info!("build: resolve");
    crate::resolve::run(ResolveArgs {
        input: workspace.clone(),
        out: workspace,
        delay_ms: args.delay_ms,
        overwrite: false,
    })
    .await
    .context("resolve")?;

    tracing::info!(
        out = %workspace_dir.display(),
        "build complete; review the mapping files, then run `publish`"
    );
    Ok(())
}
