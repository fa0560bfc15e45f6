use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::SearchConfig;
use crate::formats::Category;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Goodreads,
    Imdb,
}

impl Destination {
    pub const ALL: [Destination; 2] = [Destination::Goodreads, Destination::Imdb];

    pub fn label(self) -> &'static str {
        match self {
            Self::Goodreads => "Goodreads",
            Self::Imdb => "IMDb",
        }
    }

    pub fn category(self) -> Category {
        match self {
            Self::Goodreads => Category::Book,
            Self::Imdb => Category::Movie,
        }
    }

    pub fn mapping_file(self) -> &'static str {
        match self {
            Self::Goodreads => "goodreads_targets.json",
            Self::Imdb => "imdb_targets.json",
        }
    }

    pub fn rating_scale(self) -> RatingScale {
        match self {
            Self::Goodreads => RatingScale::FiveStar,
            Self::Imdb => RatingScale::TenPoint,
        }
    }

    pub fn base_url(self, config: &SearchConfig) -> &str {
        match self {
            Self::Goodreads => &config.goodreads_base_url,
            Self::Imdb => &config.imdb_base_url,
        }
    }

    pub fn cookie(self, config: &SearchConfig) -> Option<&str> {
        match self {
            Self::Goodreads => config.goodreads_cookie.as_deref(),
            Self::Imdb => config.imdb_cookie.as_deref(),
        }
    }

    pub fn search_site(self, base_url: &str) -> anyhow::Result<SearchSite> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("parse {} base url: {base_url}", self.label()))?;
        let site = match self {
            Self::Goodreads => SearchSite {
                base_url,
                path: "/search",
                extra_query: &[],
                result_selectors: &["a.bookTitle", ".bookTitle"],
                strip_query: false,
            },
            Self::Imdb => SearchSite {
                base_url,
                path: "/find/",
                extra_query: &[("s", "tt"), ("ttype", "ft")],
                result_selectors: &["td.result_text a", "a.ipc-metadata-list-summary-item__t"],
                strip_query: true,
            },
        };
        Ok(site)
    }

    pub fn publish_plan(self) -> PublishPlan {
        fn owned(candidates: &[&str]) -> Vec<String> {
            candidates.iter().map(|c| (*c).to_owned()).collect()
        }

        match self {
            Self::Goodreads => PublishPlan {
                open_editor: owned(&[
                    "a[href*='/review/new']",
                    "a.writeReviewLink",
                    "button[data-analytics-id='new_review']",
                    "a[data-analytics-id='new_review']",
                ]),
                rating: owned(&[
                    "#rating_star_{rating}",
                    "input[name=\"rating\"][value=\"{rating}\"]",
                    "input[name=\"review[rating]\"][value=\"{rating}\"]",
                    "label[for=\"review_rating_{rating}\"]",
                ]),
                comment: owned(&[
                    "#review_review_text",
                    "textarea[name='review[review]']",
                    "textarea#review_text",
                    "textarea[id*='review']",
                ]),
                submit: owned(&[
                    "#review_submit",
                    "input[type='submit'][value*='Save']",
                    "button[type='submit']",
                    "input[name='commit']",
                    "button[name='commit']",
                ]),
                settle: Duration::from_millis(2000),
            },
            Self::Imdb => PublishPlan {
                open_editor: owned(&["a[href*='/review/create']", "a[href*='/reviews/write']"]),
                rating: owned(&[
                    "button[aria-label='{rating}']",
                    "input[name='rating'][value='{rating}']",
                    "span.star-rating-icon",
                ]),
                comment: owned(&["textarea", "textarea[name*='review']"]),
                submit: owned(&["button[type='submit']", "input[type='submit']"]),
                settle: Duration::from_millis(1500),
            },
        }
    }
}

/// `FiveStar` keeps the value; `TenPoint` doubles it (1-5 -> 2-10, even
/// steps). Out-of-range source values are clamped into 1-5 first, and
/// `to_source` inverts the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingScale {
    FiveStar,
    TenPoint,
}

impl RatingScale {
    pub fn convert(self, source: Option<u32>) -> Option<u32> {
        let clamped = source?.clamp(1, 5);
        Some(match self {
            Self::FiveStar => clamped,
            Self::TenPoint => clamped * 2,
        })
    }

    pub fn to_source(self, destination: u32) -> u32 {
        match self {
            Self::FiveStar => destination.clamp(1, 5),
            Self::TenPoint => (destination / 2).clamp(1, 5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSite {
    pub base_url: Url,
    pub path: &'static str,
    pub extra_query: &'static [(&'static str, &'static str)],
    pub result_selectors: &'static [&'static str],
    pub strip_query: bool,
}

impl SearchSite {
    pub fn search_url(&self, query: &str) -> anyhow::Result<Url> {
        let mut url = self
            .base_url
            .join(self.path)
            .with_context(|| format!("join search path: {}", self.path))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", query);
            for (key, value) in self.extra_query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub fn absolutize(&self, href: &str) -> Option<String> {
        let mut url = self.base_url.join(href).ok()?;
        if self.strip_query {
            url.set_query(None);
        }
        Some(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishPlan {
    pub open_editor: Vec<String>,
    /// Templates; `{rating}` is replaced with the converted rating.
    pub rating: Vec<String>,
    pub comment: Vec<String>,
    pub submit: Vec<String>,
    pub settle: Duration,
}

impl PublishPlan {
    pub fn rating_candidates(&self, rating: u32) -> Vec<String> {
        let rating = rating.to_string();
        self.rating
            .iter()
            .map(|template| template.replace("{rating}", &rating))
            .collect()
    }

    pub fn with_overrides(mut self, overrides: &StepOverrides) -> Self {
        fn prepend(base: &mut Vec<String>, extra: &[String]) {
            let mut merged = extra.to_vec();
            merged.extend(base.drain(..).filter(|c| !extra.contains(c)));
            *base = merged;
        }

        prepend(&mut self.open_editor, &overrides.open_editor);
        prepend(&mut self.rating, &overrides.rating);
        prepend(&mut self.comment, &overrides.comment);
        prepend(&mut self.submit, &overrides.submit);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StepOverrides {
    pub open_editor: Vec<String>,
    pub rating: Vec<String>,
    pub comment: Vec<String>,
    pub submit: Vec<String>,
}

pub type LocatorOverrides = HashMap<Destination, StepOverrides>;

pub fn load_locator_overrides(path: &Path) -> anyhow::Result<LocatorOverrides> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read locator overrides: {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("parse locator overrides: {}", path.display()))
}
