use clap::{Args, Parser, Subcommand};

use crate::sites::Destination;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Build(BuildArgs),
    Crawl(CrawlArgs),
    Translate(TranslateArgs),
    Resolve(ResolveArgs),
    Publish(PublishArgs),
}

#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Output directory for raw record files.
    #[arg(long, default_value = ".")]
    pub out: String,

    /// Maximum listing pages to retrieve per category.
    #[arg(long, default_value_t = 999)]
    pub max_pages: usize,

    /// Listing page size used to compute `start` offsets.
    #[arg(long, default_value_t = 15)]
    pub per_page: usize,

    /// Delay after each listing page (politeness).
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,
}

#[derive(Debug, Args)]
pub struct TranslateArgs {
    /// Directory containing raw record files (created by `crawl`).
    #[arg(long, default_value = ".")]
    pub input: String,

    /// Output directory for translated record files.
    #[arg(long, default_value = ".")]
    pub out: String,

    /// Delay after each translated record.
    #[arg(long, default_value_t = 500)]
    pub delay_ms: u64,

    /// Keep records already present in the output files and translate only the rest.
    #[arg(long)]
    pub resume: bool,
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    /// Directory containing translated record files (created by `translate`).
    #[arg(long, default_value = ".")]
    pub input: String,

    /// Directory holding the mapping files (read and updated in place).
    #[arg(long, default_value = ".")]
    pub out: String,

    /// Delay after each search request.
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,

    /// Re-search records that already have a mapping entry.
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Directory containing translated record files.
    #[arg(long, default_value = ".")]
    pub input: String,

    /// Directory holding the mapping files (created by `resolve`).
    #[arg(long, default_value = ".")]
    pub mappings: String,

    /// YAML file with extra candidate locators per destination and step.
    #[arg(long)]
    pub locators: Option<String>,

    /// Append one JSON line per publish attempt to this file.
    #[arg(long)]
    pub report: Option<String>,

    /// Publish to a single destination.
    #[arg(long, value_enum)]
    pub only: Option<Destination>,

    /// How long each candidate locator is given to appear.
    #[arg(long, default_value_t = 3000)]
    pub candidate_timeout_ms: u64,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Output directory for the workspace (must not exist).
    #[arg(long)]
    pub out: String,

    /// Maximum listing pages to retrieve per category.
    #[arg(long, default_value_t = 999)]
    pub max_pages: usize,

    /// Listing page size used to compute `start` offsets.
    #[arg(long, default_value_t = 15)]
    pub per_page: usize,

    /// Delay after each listing page and each search request.
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,

    /// Delay after each translated record.
    #[arg(long, default_value_t = 500)]
    pub translate_delay_ms: u64,
}
