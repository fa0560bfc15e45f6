use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Book,
    Movie,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Book => "book",
            Self::Movie => "movie",
        }
    }
}

/// `subject_url` is the join key for every later stage and is never rewritten.
/// The aliases accept files written by the older export scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub category: Category,
    #[serde(alias = "title_zh")]
    pub title_source: String,
    pub subject_url: String,
    #[serde(default)]
    pub rating: Option<u32>,
    #[serde(default, alias = "comment_zh")]
    pub comment_source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_date: Option<String>,
    #[serde(default, alias = "authors_zh", alias = "directors_zh")]
    pub people_source: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedRecord {
    pub category: Category,
    #[serde(alias = "title")]
    pub title_target: String,
    #[serde(default, alias = "comment")]
    pub comment_target: String,
    #[serde(default)]
    pub rating: Option<u32>,
    pub subject_url: String,
    #[serde(
        default,
        alias = "author",
        alias = "director",
        deserialize_with = "people_list"
    )]
    pub people_target: Vec<String>,
}

fn people_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum People {
        List(Vec<String>),
        Joined(String),
    }

    Ok(match Option::<People>::deserialize(deserializer)? {
        Some(People::List(names)) => names,
        Some(People::Joined(joined)) => joined
            .split(" / ")
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect(),
        None => Vec::new(),
    })
}

pub type TargetMapping = BTreeMap<String, String>;

/// On-disk row of a mapping file. Both keys are optional so that half-filled
/// rows in hand-edited files can be skipped instead of rejecting the file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingRow {
    #[serde(default, alias = "source")]
    pub subject_url: Option<String>,
    #[serde(default, alias = "target")]
    pub target_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PublishOutcome {
    Posted,
    SkippedNoMapping,
    SkippedNoComment,
    SkippedDuplicate,
    Failed(String),
}

impl PublishOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Self::SkippedNoMapping | Self::SkippedNoComment | Self::SkippedDuplicate
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishReportRecord {
    pub destination: String,
    pub subject_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(flatten)]
    pub outcome: PublishOutcome,
    pub attempted_at: String,
}
