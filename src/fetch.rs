use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, USER_AGENT};

use crate::retry::{Failure, RetryPolicy};

/// Markup fetch capability: `None` covers non-200 responses and transport
/// errors alike, the caller decides what a miss means.
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    retry: RetryPolicy,
}

#[derive(Debug, Clone, Default)]
pub struct FetchIdentity<'a> {
    pub user_agent: &'a str,
    pub accept_language: Option<&'a str>,
    pub cookie: Option<&'a str>,
}

impl HttpFetcher {
    pub fn new(identity: FetchIdentity<'_>, retry: RetryPolicy) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(identity.user_agent).context("user agent header")?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        if let Some(lang) = identity.accept_language {
            headers.insert(
                ACCEPT_LANGUAGE,
                HeaderValue::from_str(lang).context("accept-language header")?,
            );
        }
        if let Some(cookie) = identity.cookie {
            let mut value = HeaderValue::from_str(cookie).context("cookie header")?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .default_headers(headers)
            .build()
            .context("build http client")?;

        Ok(Self { client, retry })
    }
}

#[async_trait]
impl HtmlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        let client = &self.client;
        let result = self
            .retry
            .run("fetch", move || async move {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .map_err(|err| Failure::transport(err, format!("GET {url}")))?;

                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    let body = response
                        .text()
                        .await
                        .map_err(|err| Failure::transport(err, format!("read body {url}")))?;
                    return Ok(Some(body));
                }
                if Failure::is_transient_status(status) {
                    return Err(Failure::Transient(anyhow::anyhow!("GET {url} -> {status}")));
                }

                tracing::warn!(url, %status, "unexpected status");
                Ok(None)
            })
            .await;

        match result {
            Ok(body) => body,
            Err(err) => {
                tracing::warn!(url, error = %format!("{err:#}"), "fetch failed");
                None
            }
        }
    }
}
