use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use anyhow::Context as _;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cli::TranslateArgs;
use crate::config::CompletionConfig;
use crate::formats::{Category, RawRecord, TranslatedRecord};
use crate::openai::{ChatClient, Completion, CompletionOptions};
use crate::store;

static ALIAS_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[／/|｜]").expect("alias separator regex"));

static LATIN_LETTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]").expect("latin letter regex"));

const STRUCTURED_OPTIONS: CompletionOptions = CompletionOptions {
    temperature: 0.2,
    max_tokens: 800,
};
const FREE_TEXT_OPTIONS: CompletionOptions = CompletionOptions {
    temperature: 0.2,
    max_tokens: 800,
};
const PERSON_OPTIONS: CompletionOptions = CompletionOptions {
    temperature: 0.0,
    max_tokens: 50,
};

pub fn embedded_latin_alias(title: &str) -> Option<String> {
    ALIAS_SEPARATORS
        .split(title)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .find(|part| LATIN_LETTER.is_match(part))
        .map(str::to_owned)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedFields {
    pub title: String,
    pub comment: String,
    pub people: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredOutcome {
    Structured(TranslatedFields),
    /// The joint call failed; title and comment were translated one by one.
    /// `people` is always empty here.
    Degraded {
        fields: TranslatedFields,
        reason: String,
    },
    Failed { reason: String },
}

#[derive(Debug, Serialize)]
struct StructuredRequest<'a> {
    category: &'a str,
    title: &'a str,
    comment: &'a str,
    people: &'a [String],
}

#[derive(Debug, Deserialize)]
struct StructuredReply {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    people: Option<serde_json::Value>,
}

fn extract_json_object(text: &str) -> anyhow::Result<&str> {
    let start = text
        .find('{')
        .ok_or_else(|| anyhow::anyhow!("missing `{{`"))?;
    let end = text
        .rfind('}')
        .ok_or_else(|| anyhow::anyhow!("missing `}}`"))?;
    if end <= start {
        anyhow::bail!("invalid json object span");
    }
    Ok(&text[start..=end])
}

/// Parse the joint reply. A `people` value that is not a list of strings of
/// the expected length is dropped so the per-name fallback fills it instead.
pub fn parse_structured_reply(text: &str, expected_people: usize) -> anyhow::Result<TranslatedFields> {
    let json = extract_json_object(text).context("locate json object")?;
    let reply: StructuredReply = serde_json::from_str(json).context("parse structured reply")?;

    let people = match reply.people {
        Some(serde_json::Value::Array(items)) => {
            let names = items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.trim().to_owned()))
                .collect::<Vec<_>>();
            if names.len() == items.len() && names.len() == expected_people {
                names
            } else {
                tracing::debug!(
                    expected = expected_people,
                    got = items.len(),
                    "structured people list has unexpected shape; dropping"
                );
                Vec::new()
            }
        }
        _ => Vec::new(),
    };

    Ok(TranslatedFields {
        title: reply.title.unwrap_or_default().trim().to_owned(),
        comment: reply.comment.unwrap_or_default().trim().to_owned(),
        people,
    })
}

pub struct Translator {
    completion: Arc<dyn Completion>,
    language: String,
}

impl Translator {
    pub fn new(completion: Arc<dyn Completion>, language: impl Into<String>) -> Self {
        Self {
            completion,
            language: language.into(),
        }
    }

    fn structured_prompt(&self) -> String {
        format!(
            "You are a bilingual expert who maps Douban entries to their official {lang} data.\n\
Input: a JSON object with `category`, `title`, `comment` and `people` (authors for books, directors for movies).\n\
Return a JSON object with exactly three fields:\n\
- `title`: the official {lang} release title; if several aliases exist pick the widely used official one.\n\
- `comment`: a natural {lang} translation of the review; empty string if the input comment is empty.\n\
- `people`: {lang} renderings of the given names, same order and same length; empty string for unknown names; no nationalities or descriptors.\n\
Use the people list to disambiguate the title.\n\
Only return JSON, no extra text.",
            lang = self.language
        )
    }

    fn review_prompt(&self) -> String {
        format!(
            "You are a professional translator specializing in reviews of books and films. \
Translate the following text into fluent, natural {lang}, as if it were written by a native user on a {lang} review site. \
Preserve meaning, tone and emotional nuance, adapting culture-specific references for international readers. \
Output only the translation, without any explanations.",
            lang = self.language
        )
    }

    fn person_prompt(&self) -> String {
        format!(
            "You transliterate and normalize personal names into their standard {lang} renderings. \
Return only the name, no explanations, no brackets, no nationality, no titles.",
            lang = self.language
        )
    }

    pub async fn translate_structured(&self, raw: &RawRecord) -> StructuredOutcome {
        let request = StructuredRequest {
            category: raw.category.as_str(),
            title: &raw.title_source,
            comment: &raw.comment_source,
            people: &raw.people_source,
        };
        let reason = match serde_json::to_string(&request) {
            Ok(payload) => {
                match self
                    .completion
                    .complete(&self.structured_prompt(), &payload, STRUCTURED_OPTIONS)
                    .await
                {
                    Ok(text) => match parse_structured_reply(&text, raw.people_source.len()) {
                        Ok(fields) => return StructuredOutcome::Structured(fields),
                        Err(err) => format!("malformed structured reply: {err:#}"),
                    },
                    Err(err) => format!("structured call failed: {err:#}"),
                }
            }
            Err(err) => format!("serialize structured request: {err}"),
        };

        tracing::warn!(subject_url = %raw.subject_url, reason = %reason, "structured translation failed; falling back");
        self.free_text_fallback(raw, reason).await
    }

    async fn free_text_fallback(&self, raw: &RawRecord, reason: String) -> StructuredOutcome {
        let title = self.translate_free_text(&raw.title_source).await;
        let comment = self.translate_free_text(&raw.comment_source).await;

        match (title, comment) {
            (Err(title_err), Err(comment_err)) => StructuredOutcome::Failed {
                reason: format!("{reason}; title: {title_err:#}; comment: {comment_err:#}"),
            },
            (title, comment) => {
                let title = title.unwrap_or_else(|err| {
                    tracing::warn!(subject_url = %raw.subject_url, error = %format!("{err:#}"), "title translation failed");
                    String::new()
                });
                let comment = comment.unwrap_or_else(|err| {
                    tracing::warn!(subject_url = %raw.subject_url, error = %format!("{err:#}"), "comment translation failed");
                    String::new()
                });
                StructuredOutcome::Degraded {
                    fields: TranslatedFields {
                        title,
                        comment,
                        people: Vec::new(),
                    },
                    reason,
                }
            }
        }
    }

    async fn translate_free_text(&self, text: &str) -> anyhow::Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        self.completion
            .complete(&self.review_prompt(), text, FREE_TEXT_OPTIONS)
            .await
    }

    /// One transliteration request per name; a failed name stays as it was.
    pub async fn translate_people(&self, people: &[String]) -> Vec<String> {
        let prompt = self.person_prompt();
        let mut translated = Vec::with_capacity(people.len());
        for name in people {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let rendered = match self.completion.complete(&prompt, name, PERSON_OPTIONS).await {
                Ok(text) if !text.trim().is_empty() => text.trim().to_owned(),
                Ok(_) => name.to_owned(),
                Err(err) => {
                    tracing::warn!(name, error = %format!("{err:#}"), "name translation failed; keeping original");
                    name.to_owned()
                }
            };
            translated.push(rendered);
        }
        translated
    }

    pub async fn translate(&self, raw: &RawRecord) -> TranslatedRecord {
        let alias = match raw.category {
            Category::Movie => embedded_latin_alias(&raw.title_source),
            Category::Book => None,
        };
        let has_comment = !raw.comment_source.trim().is_empty();

        let fields = if alias.is_some() && !has_comment && raw.people_source.is_empty() {
            TranslatedFields::default()
        } else {
            match self.translate_structured(raw).await {
                StructuredOutcome::Structured(fields) => fields,
                StructuredOutcome::Degraded { fields, .. } => fields,
                StructuredOutcome::Failed { reason } => {
                    tracing::warn!(subject_url = %raw.subject_url, reason = %reason, "translation failed; keeping empty fields");
                    TranslatedFields::default()
                }
            }
        };

        let people_target = if raw.people_source.is_empty() {
            Vec::new()
        } else if fields.people.is_empty() {
            self.translate_people(&raw.people_source).await
        } else {
            fields.people
        };

        TranslatedRecord {
            category: raw.category,
            title_target: alias.unwrap_or(fields.title),
            comment_target: if has_comment { fields.comment } else { String::new() },
            rating: raw.rating,
            subject_url: raw.subject_url.clone(),
            people_target,
        }
    }
}

/// Records already present in `done` (by `subject_url`) are kept and skipped.
pub async fn translate_all(
    translator: &Translator,
    items: &[RawRecord],
    mut done: Vec<TranslatedRecord>,
    save_path: &Path,
    delay: Duration,
) -> anyhow::Result<Vec<TranslatedRecord>> {
    let finished: HashSet<String> = done.iter().map(|r| r.subject_url.clone()).collect();
    let pending = items
        .iter()
        .filter(|item| !finished.contains(&item.subject_url))
        .collect::<Vec<_>>();
    let total = pending.len();
    if total < items.len() {
        tracing::info!(
            skipped = items.len() - total,
            path = %save_path.display(),
            "resuming; skipping already translated records"
        );
    }

    for (idx, item) in pending.into_iter().enumerate() {
        let translated = translator.translate(item).await;
        done.push(translated);
        store::write_json(save_path, &done)
            .with_context(|| format!("save translated records: {}", save_path.display()))?;

        tracing::info!(done = idx + 1, total, path = %save_path.display(), "translate: progress");
        tokio::time::sleep(delay).await;
    }

    Ok(done)
}

async fn translate_category(
    translator: &Translator,
    raw_path: &Path,
    out_path: &Path,
    resume: bool,
    delay: Duration,
) -> anyhow::Result<Vec<TranslatedRecord>> {
    let items: Vec<RawRecord> = store::read_records(raw_path)?;
    let done = if resume {
        store::read_records(out_path)?
    } else {
        Vec::new()
    };
    if items.is_empty() {
        return Ok(done);
    }
    translate_all(translator, &items, done, out_path, delay).await
}

pub async fn run(args: TranslateArgs) -> anyhow::Result<()> {
    let config = CompletionConfig::from_env().context("load completion config")?;
    let retry = crate::config::retry_policy_from_env().context("load retry policy")?;
    let client = ChatClient::new(&config, retry)?;
    let translator = Translator::new(Arc::new(client), config.target_language.clone());

    let input_dir = PathBuf::from(&args.input);
    let out_dir = PathBuf::from(&args.out);
    let delay = Duration::from_millis(args.delay_ms);

    let books = translate_category(
        &translator,
        &input_dir.join(store::BOOK_RAW_FILE),
        &out_dir.join(store::BOOK_TRANSLATED_FILE),
        args.resume,
        delay,
    )
    .await
    .context("translate books")?;
    let movies = translate_category(
        &translator,
        &input_dir.join(store::MOVIE_RAW_FILE),
        &out_dir.join(store::MOVIE_TRANSLATED_FILE),
        args.resume,
        delay,
    )
    .await
    .context("translate movies")?;

    let all = books.iter().chain(movies.iter()).collect::<Vec<_>>();
    store::write_json(&out_dir.join(store::ALL_TRANSLATED_FILE), &all)
        .context("save merged translated export")?;

    tracing::info!(
        books = books.len(),
        movies = movies.len(),
        total = all.len(),
        "translate summary"
    );
    Ok(())
}
