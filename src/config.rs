use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0 Safari/537.36";

const COOKIE_PLACEHOLDER: &str = "YOUR_DOUBAN_COOKIE_HERE";
const USER_ID_PLACEHOLDER: &str = "YOUR_DOUBAN_USER_ID";

/// Environment lookup. `from_env` constructors pass `std::env::var`; tests pass
/// a closure over a fixed table.
pub trait Lookup: Fn(&str) -> Option<String> {}
impl<F: Fn(&str) -> Option<String>> Lookup for F {}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn or_default(lookup: &impl Lookup, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_or<T: std::str::FromStr>(lookup: &impl Lookup, key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("parse {key}={raw:?}")),
        None => Ok(default),
    }
}

fn flag(lookup: &impl Lookup, key: &str, default: bool) -> bool {
    match lookup(key) {
        Some(raw) => raw.trim() == "1",
        None => default,
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub cookie: String,
    pub user_id: String,
    pub book_base_url: String,
    pub movie_base_url: String,
    pub user_agent: String,
    pub detail_delay: Duration,
}

impl SourceConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> anyhow::Result<Self> {
        let cookie = lookup("DOUBAN_COOKIE")
            .filter(|v| !v.contains(COOKIE_PLACEHOLDER))
            .ok_or_else(|| anyhow::anyhow!("DOUBAN_COOKIE is not set"))?;
        let user_id = lookup("DOUBAN_USER_ID")
            .filter(|v| v != USER_ID_PLACEHOLDER)
            .ok_or_else(|| anyhow::anyhow!("DOUBAN_USER_ID is not set"))?;
        let detail_delay_secs: f64 = parse_or(lookup, "DIRECTOR_DELAY", 0.3)?;
        if !detail_delay_secs.is_finite() || detail_delay_secs < 0.0 {
            anyhow::bail!("DIRECTOR_DELAY must be a non-negative number of seconds");
        }

        Ok(Self {
            cookie,
            user_id,
            book_base_url: or_default(lookup, "DOUBAN_BOOK_BASE_URL", "https://book.douban.com"),
            movie_base_url: or_default(lookup, "DOUBAN_MOVIE_BASE_URL", "https://movie.douban.com"),
            user_agent: or_default(lookup, "BROWSER_UA", DEFAULT_USER_AGENT),
            detail_delay: Duration::from_secs_f64(detail_delay_secs),
        })
    }

    pub fn book_collect_url(&self) -> String {
        collect_url(&self.book_base_url, &self.user_id)
    }

    pub fn movie_collect_url(&self) -> String {
        collect_url(&self.movie_base_url, &self.user_id)
    }
}

fn collect_url(base_url: &str, user_id: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/people/{user_id}/collect")
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub target_language: String,
}

impl CompletionConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> anyhow::Result<Self> {
        let api_key =
            lookup("QWEN_API_KEY").ok_or_else(|| anyhow::anyhow!("QWEN_API_KEY is not set"))?;
        Ok(Self {
            api_key,
            base_url: or_default(
                lookup,
                "QWEN_BASE_URL",
                "https://dashscope.aliyuncs.com/compatible-mode/v1",
            ),
            model: or_default(lookup, "QWEN_MODEL", "qwen-plus"),
            target_language: or_default(lookup, "SHELFSYNC_TARGET_LANGUAGE", "English"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub user_agent: String,
    pub accept_language: String,
    pub goodreads_cookie: Option<String>,
    pub imdb_cookie: Option<String>,
    pub goodreads_base_url: String,
    pub imdb_base_url: String,
}

impl SearchConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> Self {
        Self {
            user_agent: or_default(lookup, "BROWSER_UA", DEFAULT_USER_AGENT),
            accept_language: or_default(lookup, "ACCEPT_LANGUAGE", "en-US,en;q=0.9"),
            goodreads_cookie: lookup("GOODREADS_COOKIE"),
            imdb_cookie: lookup("IMDB_COOKIE"),
            goodreads_base_url: or_default(
                lookup,
                "GOODREADS_BASE_URL",
                "https://www.goodreads.com",
            ),
            imdb_base_url: or_default(lookup, "IMDB_BASE_URL", "https://www.imdb.com"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub node_bin: String,
    pub headless: bool,
    pub wait_for_login: bool,
    pub goodreads_profile: PathBuf,
    pub imdb_profile: PathBuf,
}

impl BrowserConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: &impl Lookup) -> Self {
        Self {
            node_bin: or_default(lookup, "SHELFSYNC_NODE_BIN", "node"),
            headless: flag(lookup, "HEADLESS", false),
            wait_for_login: flag(lookup, "WAIT_FOR_LOGIN", true),
            goodreads_profile: PathBuf::from(or_default(
                lookup,
                "GOODREADS_PROFILE_DIR",
                ".pw_goodreads_profile",
            )),
            imdb_profile: PathBuf::from(or_default(lookup, "IMDB_PROFILE_DIR", ".pw_imdb_profile")),
        }
    }
}

pub fn retry_policy_from_env() -> anyhow::Result<RetryPolicy> {
    retry_policy_from_lookup(&process_env)
}

pub fn retry_policy_from_lookup(lookup: &impl Lookup) -> anyhow::Result<RetryPolicy> {
    let defaults = RetryPolicy::default();
    let attempts: u32 = parse_or(lookup, "SHELFSYNC_RETRY_ATTEMPTS", defaults.attempts)?;
    if attempts == 0 {
        anyhow::bail!("SHELFSYNC_RETRY_ATTEMPTS must be >= 1");
    }
    let base_ms: u64 = parse_or(
        lookup,
        "SHELFSYNC_RETRY_BASE_MS",
        defaults.base_delay.as_millis() as u64,
    )?;
    Ok(RetryPolicy {
        attempts,
        base_delay: Duration::from_millis(base_ms),
        max_delay: defaults.max_delay,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn table(pairs: &[(&str, &str)]) -> impl Lookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn source_config_requires_cookie_and_user_id() {
        let err = SourceConfig::from_lookup(&table(&[("DOUBAN_USER_ID", "u1")]))
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(err.contains("DOUBAN_COOKIE"), "err={err}");

        let err = SourceConfig::from_lookup(&table(&[
            ("DOUBAN_COOKIE", "bid=1"),
            ("DOUBAN_USER_ID", USER_ID_PLACEHOLDER),
        ]))
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
        assert!(err.contains("DOUBAN_USER_ID"), "err={err}");
    }

    #[test]
    fn source_config_rejects_placeholder_cookie() {
        let result = SourceConfig::from_lookup(&table(&[
            ("DOUBAN_COOKIE", COOKIE_PLACEHOLDER),
            ("DOUBAN_USER_ID", "u1"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn source_config_builds_collect_urls() -> anyhow::Result<()> {
        let config = SourceConfig::from_lookup(&table(&[
            ("DOUBAN_COOKIE", "bid=1"),
            ("DOUBAN_USER_ID", "reader42"),
            ("DOUBAN_BOOK_BASE_URL", "http://127.0.0.1:9/book/"),
        ]))?;
        assert_eq!(
            config.book_collect_url(),
            "http://127.0.0.1:9/book/people/reader42/collect"
        );
        assert_eq!(
            config.movie_collect_url(),
            "https://movie.douban.com/people/reader42/collect"
        );
        assert_eq!(config.detail_delay, Duration::from_millis(300));
        Ok(())
    }

    #[test]
    fn retry_policy_reads_overrides_and_rejects_zero() -> anyhow::Result<()> {
        let policy = retry_policy_from_lookup(&table(&[
            ("SHELFSYNC_RETRY_ATTEMPTS", "5"),
            ("SHELFSYNC_RETRY_BASE_MS", "10"),
        ]))?;
        assert_eq!(policy.attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(10));

        assert!(retry_policy_from_lookup(&table(&[("SHELFSYNC_RETRY_ATTEMPTS", "0")])).is_err());
        Ok(())
    }

    #[test]
    fn browser_config_flags() {
        let config = BrowserConfig::from_lookup(&table(&[
            ("HEADLESS", "1"),
            ("WAIT_FOR_LOGIN", "0"),
        ]));
        assert!(config.headless);
        assert!(!config.wait_for_login);
        assert_eq!(config.node_bin, "node");
    }
}
