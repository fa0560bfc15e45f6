mod completion_stub;

use std::fs;
use std::path::Path;

use completion_stub::{CompletionStub, StructuredBehavior};
use shelfsync::formats::TranslatedRecord;
use shelfsync::store::{ALL_TRANSLATED_FILE, BOOK_RAW_FILE, BOOK_TRANSLATED_FILE};

fn translate_cmd(workdir: &Path, completion: &CompletionStub) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("shelfsync");
    cmd.env_clear()
        .current_dir(workdir)
        .env("QWEN_API_KEY", "test-key")
        .env("QWEN_BASE_URL", &completion.base_url)
        .env("SHELFSYNC_RETRY_BASE_MS", "1")
        .args(["translate", "--delay-ms", "0"]);
    cmd
}

/// Raw books file in the older export's key names.
const LEGACY_RAW_BOOKS: &str = r#"[
  {
    "category": "book",
    "title_zh": "活着",
    "subject_url": "https://book.douban.com/subject/4913064/",
    "rating": 5,
    "comment_zh": "非常震撼",
    "authors_zh": ["余华"]
  },
  {
    "category": "book",
    "title_zh": "三体",
    "subject_url": "https://book.douban.com/subject/2567698/",
    "rating": null,
    "comment_zh": "",
    "authors_zh": []
  }
]"#;

#[test]
fn prose_reply_falls_back_to_field_by_field_translation() -> anyhow::Result<()> {
    let completion = CompletionStub::spawn(StructuredBehavior::Prose);
    let temp = tempfile::TempDir::new()?;
    fs::write(temp.path().join(BOOK_RAW_FILE), LEGACY_RAW_BOOKS)?;

    translate_cmd(temp.path(), &completion).assert().success();

    let books: Vec<TranslatedRecord> =
        shelfsync::store::read_records(&temp.path().join(BOOK_TRANSLATED_FILE))?;
    assert_eq!(books.len(), 2);

    assert_eq!(books[0].title_target, "EN 活着");
    assert_eq!(books[0].comment_target, "EN 非常震撼");
    assert_eq!(books[0].people_target, vec!["EN 余华"]);
    assert_eq!(books[0].rating, Some(5));

    assert_eq!(books[1].title_target, "EN 三体");
    assert_eq!(books[1].comment_target, "", "empty source comment stays empty");
    assert!(books[1].people_target.is_empty());

    assert_eq!(
        completion.calls(),
        vec!["structured", "review", "review", "person", "structured", "review"]
    );

    let merged: Vec<TranslatedRecord> =
        shelfsync::store::read_records(&temp.path().join(ALL_TRANSLATED_FILE))?;
    assert_eq!(merged, books);
    Ok(())
}

#[test]
fn resume_skips_records_already_translated() -> anyhow::Result<()> {
    let completion = CompletionStub::spawn(StructuredBehavior::Json);
    let temp = tempfile::TempDir::new()?;
    fs::write(temp.path().join(BOOK_RAW_FILE), LEGACY_RAW_BOOKS)?;
    fs::write(
        temp.path().join(BOOK_TRANSLATED_FILE),
        r#"[{
            "category": "book",
            "title": "To Live (hand edited)",
            "comment": "Devastating.",
            "rating": 5,
            "subject_url": "https://book.douban.com/subject/4913064/",
            "people_target": ["Yu Hua"]
        }]"#,
    )?;

    translate_cmd(temp.path(), &completion)
        .arg("--resume")
        .assert()
        .success();

    let books: Vec<TranslatedRecord> =
        shelfsync::store::read_records(&temp.path().join(BOOK_TRANSLATED_FILE))?;
    assert_eq!(books.len(), 2);
    assert_eq!(books[0].title_target, "To Live (hand edited)");
    assert_eq!(books[0].people_target, vec!["Yu Hua"]);
    assert_eq!(books[1].title_target, "EN 三体");
    assert_eq!(completion.calls(), vec!["structured"]);
    Ok(())
}

#[test]
fn missing_raw_files_produce_empty_outputs() -> anyhow::Result<()> {
    let completion = CompletionStub::spawn(StructuredBehavior::Json);
    let temp = tempfile::TempDir::new()?;

    translate_cmd(temp.path(), &completion).assert().success();

    let merged: Vec<TranslatedRecord> =
        shelfsync::store::read_records(&temp.path().join(ALL_TRANSLATED_FILE))?;
    assert!(merged.is_empty());
    assert!(completion.calls().is_empty());
    Ok(())
}
