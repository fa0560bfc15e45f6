use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use scraper::Html;

use crate::cli::ResolveArgs;
use crate::config::SearchConfig;
use crate::fetch::{FetchIdentity, HtmlFetcher, HttpFetcher};
use crate::formats::{TargetMapping, TranslatedRecord};
use crate::sites::{Destination, SearchSite};
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Entry already present and not overwritten; no search was issued.
    Existing,
    Found(String),
    NotFound,
}

pub fn build_query(record: &TranslatedRecord) -> String {
    std::iter::once(record.title_target.trim())
        .chain(record.people_target.iter().map(|p| p.trim()))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn first_result_href(html: &str, site: &SearchSite) -> anyhow::Result<Option<String>> {
    let doc = Html::parse_document(html);
    let Some(anchor) = crate::html::select_first(doc.root_element(), site.result_selectors)? else {
        return Ok(None);
    };
    let href = crate::html::attr_trimmed(anchor, "href");
    if href.is_empty() {
        return Ok(None);
    }
    Ok(site.absolutize(&href))
}

pub struct Resolver {
    fetcher: Arc<dyn HtmlFetcher>,
    site: SearchSite,
    delay: Duration,
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn HtmlFetcher>, site: SearchSite, delay: Duration) -> Self {
        Self {
            fetcher,
            site,
            delay,
        }
    }

    async fn search(&self, query: &str) -> anyhow::Result<Option<String>> {
        let url = self.site.search_url(query)?;
        let Some(html) = self.fetcher.fetch(url.as_str()).await else {
            return Ok(None);
        };
        first_result_href(&html, &self.site)
    }

    pub async fn resolve(
        &self,
        record: &TranslatedRecord,
        existing: &TargetMapping,
        overwrite: bool,
    ) -> Resolution {
        if !overwrite && existing.contains_key(&record.subject_url) {
            return Resolution::Existing;
        }

        let query = build_query(record);
        if query.is_empty() {
            tracing::warn!(subject_url = %record.subject_url, "no title to search with");
            return Resolution::NotFound;
        }

        let result = self.search(&query).await;
        tokio::time::sleep(self.delay).await;
        match result {
            Ok(Some(url)) => Resolution::Found(url),
            Ok(None) => Resolution::NotFound,
            Err(err) => {
                tracing::warn!(
                    subject_url = %record.subject_url,
                    query = %query,
                    error = %format!("{err:#}"),
                    "search failed"
                );
                Resolution::NotFound
            }
        }
    }

    pub async fn build_mapping(
        &self,
        records: &[TranslatedRecord],
        mapping: &mut TargetMapping,
        overwrite: bool,
        save_path: &Path,
    ) -> anyhow::Result<ResolveSummary> {
        let mut summary = ResolveSummary::default();
        let total = records.len();

        for (idx, record) in records.iter().enumerate() {
            match self.resolve(record, mapping, overwrite).await {
                Resolution::Existing => summary.kept += 1,
                Resolution::NotFound => {
                    tracing::warn!(
                        subject_url = %record.subject_url,
                        title = %record.title_target,
                        "no search result"
                    );
                    summary.missing += 1;
                }
                Resolution::Found(url) => {
                    tracing::info!(subject_url = %record.subject_url, target_url = %url, "resolved");
                    mapping.insert(record.subject_url.clone(), url);
                    store::write_mapping(save_path, mapping)
                        .with_context(|| format!("save mapping: {}", save_path.display()))?;
                    summary.found += 1;
                }
            }
            tracing::debug!(done = idx + 1, total, "resolve: progress");
        }

        Ok(summary)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveSummary {
    pub found: usize,
    pub kept: usize,
    pub missing: usize,
}

pub async fn resolve_destination(
    destination: Destination,
    config: &SearchConfig,
    retry: crate::retry::RetryPolicy,
    input_dir: &Path,
    out_dir: &Path,
    delay: Duration,
    overwrite: bool,
) -> anyhow::Result<ResolveSummary> {
    let records: Vec<TranslatedRecord> =
        store::read_records(&input_dir.join(store::translated_file(destination.category())))?;
    let mapping_path = out_dir.join(destination.mapping_file());
    let mut mapping = store::read_mapping(&mapping_path)?;
    if records.is_empty() {
        tracing::info!(destination = destination.label(), "nothing to resolve");
        return Ok(ResolveSummary::default());
    }

    let fetcher = HttpFetcher::new(
        FetchIdentity {
            user_agent: &config.user_agent,
            accept_language: Some(&config.accept_language),
            cookie: destination.cookie(config),
        },
        retry,
    )?;
    let site = destination.search_site(destination.base_url(config))?;
    let resolver = Resolver::new(Arc::new(fetcher), site, delay);

    let summary = resolver
        .build_mapping(&records, &mut mapping, overwrite, &mapping_path)
        .await?;
    tracing::info!(
        destination = destination.label(),
        found = summary.found,
        kept = summary.kept,
        missing = summary.missing,
        path = %mapping_path.display(),
        "resolve summary"
    );
    Ok(summary)
}

pub async fn run(args: ResolveArgs) -> anyhow::Result<()> {
    let config = SearchConfig::from_env();
    let retry = crate::config::retry_policy_from_env().context("load retry policy")?;
    let input_dir = PathBuf::from(&args.input);
    let out_dir = PathBuf::from(&args.out);
    let delay = Duration::from_millis(args.delay_ms);

    for destination in Destination::ALL {
        resolve_destination(
            destination,
            &config,
            retry,
            &input_dir,
            &out_dir,
            delay,
            args.overwrite,
        )
        .await
        .with_context(|| format!("resolve {}", destination.label()))?;
    }
    Ok(())
}
