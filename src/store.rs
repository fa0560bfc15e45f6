use std::io::Write as _;
use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::formats::{Category, MappingRow, TargetMapping};

pub const BOOK_RAW_FILE: &str = "douban_books_raw.json";
pub const MOVIE_RAW_FILE: &str = "douban_movies_raw.json";
pub const ALL_RAW_FILE: &str = "douban_export_raw.json";
pub const BOOK_TRANSLATED_FILE: &str = "douban_books_translated.json";
pub const MOVIE_TRANSLATED_FILE: &str = "douban_movies_translated.json";
pub const ALL_TRANSLATED_FILE: &str = "douban_export_translated.json";

pub fn translated_file(category: Category) -> &'static str {
    match category {
        Category::Book => BOOK_TRANSLATED_FILE,
        Category::Movie => MOVIE_TRANSLATED_FILE,
    }
}

/// A missing file is an empty artifact. Elements that do not deserialize are
/// skipped with a warning so one hand-edited row cannot sink the whole stage.
pub fn read_records<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "artifact not found; treating as empty");
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read artifact: {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parse artifact json: {}", path.display()))?;
    let serde_json::Value::Array(items) = value else {
        anyhow::bail!("artifact is not a JSON array: {}", path.display());
    };

    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<T>(item) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    index = idx,
                    error = %err,
                    "skipping malformed record"
                );
            }
        }
    }
    Ok(records)
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create artifact dir: {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in: {}", dir.display()))?;
    serde_json::to_writer_pretty(&mut tmp, value).context("serialize artifact json")?;
    tmp.write_all(b"\n").context("write artifact newline")?;
    tmp.flush().context("flush artifact")?;
    tmp.persist(path)
        .map_err(|err| anyhow::anyhow!("replace artifact {}: {}", path.display(), err.error))?;
    Ok(())
}

pub fn read_mapping(path: &Path) -> anyhow::Result<TargetMapping> {
    let rows: Vec<MappingRow> = read_records(path)?;
    let mut mapping = TargetMapping::new();
    for row in rows {
        let (Some(src), Some(dst)) = (row.subject_url, row.target_url) else {
            continue;
        };
        let (src, dst) = (src.trim(), dst.trim());
        if src.is_empty() || dst.is_empty() {
            continue;
        }
        mapping.insert(src.to_owned(), dst.to_owned());
    }
    Ok(mapping)
}

pub fn write_mapping(path: &Path, mapping: &TargetMapping) -> anyhow::Result<()> {
    let rows = mapping
        .iter()
        .map(|(src, dst)| MappingRow {
            subject_url: Some(src.clone()),
            target_url: Some(dst.clone()),
        })
        .collect::<Vec<_>>();
    write_json(path, &rows)?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "saved mapping");
    Ok(())
}
