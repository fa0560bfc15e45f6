use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use regex::Regex;
use scraper::{ElementRef, Html};

use crate::cli::CrawlArgs;
use crate::config::SourceConfig;
use crate::fetch::{FetchIdentity, HtmlFetcher, HttpFetcher};
use crate::formats::{Category, RawRecord};
use crate::html::{attr_trimmed, select_first, selector, text_of};

static RATING_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"rating(\d+)-t").expect("rating class regex"));

static PEOPLE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[、/／,，；;]+").expect("people separator regex"));

static DIRECTOR_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(导演|Directors?)[:：]\s*").expect("director label regex")
});

const DIRECTOR_STOP_TOKENS: &[&str] = &[
    "主演", "演员", "类型", "片长", "又名", "首播", "上映", "语言", "编剧", "国家", "地区", "季数",
    "集数", "Starring", "Cast",
];

pub type ListingParser = fn(&str) -> anyhow::Result<Vec<RawRecord>>;

pub fn rating_from_classes<'a>(classes: impl IntoIterator<Item = &'a str>) -> Option<u32> {
    classes.into_iter().find_map(|class| {
        RATING_CLASS
            .captures(class)
            .and_then(|caps| caps[1].parse().ok())
    })
}

pub fn split_people(text: &str) -> Vec<String> {
    PEOPLE_SEPARATORS
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn item_rating(item: ElementRef<'_>) -> anyhow::Result<Option<u32>> {
    let inner = select_first(item, &[r#"[class*="rating"]"#])?
        .and_then(|span| rating_from_classes(span.value().classes()));
    Ok(inner.or_else(|| rating_from_classes(item.value().classes())))
}

fn comment_of(item: ElementRef<'_>) -> anyhow::Result<String> {
    Ok(select_first(item, &[".comment"])?
        .map(|el| text_of(el, ""))
        .unwrap_or_default())
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() { None } else { Some(text) }
}

pub fn parse_book_listing(html: &str) -> anyhow::Result<Vec<RawRecord>> {
    let document = Html::parse_document(html);
    let items = selector(".subject-item")?;
    let mut records = Vec::new();

    for item in document.select(&items) {
        let Some(anchor) = select_first(item, &["h2 a"])? else {
            continue;
        };
        let subject_url = attr_trimmed(anchor, "href");
        if subject_url.is_empty() {
            tracing::debug!("book item without subject url; skipping");
            continue;
        }

        let people_source = match select_first(item, &[".pub"])? {
            Some(pub_el) => {
                let pub_text = text_of(pub_el, " ");
                let authors = pub_text.split('/').next().unwrap_or_default();
                split_people(authors)
            }
            None => Vec::new(),
        };

        // Book dates carry a trailing status word ("2023-01-05 读过").
        let comment_date = select_first(item, &[".pubtime", ".date"])?
            .and_then(|el| text_of(el, "").split_whitespace().next().map(str::to_owned));

        records.push(RawRecord {
            category: Category::Book,
            title_source: text_of(anchor, ""),
            subject_url,
            rating: item_rating(item)?,
            comment_source: comment_of(item)?,
            comment_date,
            people_source,
        });
    }

    Ok(records)
}

pub fn parse_movie_listing(html: &str) -> anyhow::Result<Vec<RawRecord>> {
    let document = Html::parse_document(html);
    let items = selector(".item")?;
    let mut records = Vec::new();

    for item in document.select(&items) {
        let Some(anchor) = select_first(item, &["li.title a", "a.nbg", "a"])? else {
            continue;
        };
        let subject_url = attr_trimmed(anchor, "href");
        if subject_url.is_empty() {
            tracing::debug!("movie item without subject url; skipping");
            continue;
        }

        let comment_date = select_first(item, &[".date"])?.and_then(|el| non_empty(text_of(el, "")));

        records.push(RawRecord {
            category: Category::Movie,
            title_source: text_of(anchor, ""),
            subject_url,
            rating: item_rating(item)?,
            comment_source: comment_of(item)?,
            comment_date,
            // Directors come from the detail page in a second pass.
            people_source: Vec::new(),
        });
    }

    Ok(records)
}

/// Tagged director anchors win outright. Otherwise the labelled field in the
/// `#info` block is cut at the nearest stop token (or the first `/`) and split.
/// An empty result means "unknown", not an error.
pub fn directors_from_detail(html: &str) -> anyhow::Result<Vec<String>> {
    let document = Html::parse_document(html);

    let tagged = document
        .select(&selector(r#"a[rel="v:directedBy"]"#)?)
        .map(|a| text_of(a, ""))
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>();
    if !tagged.is_empty() {
        return Ok(tagged);
    }

    let Some(info) = document.select(&selector("#info")?).next() else {
        return Ok(Vec::new());
    };
    Ok(directors_from_info_text(&text_of(info, " ")))
}

fn directors_from_info_text(info_text: &str) -> Vec<String> {
    let Some(label) = DIRECTOR_LABEL.find(info_text) else {
        return Vec::new();
    };
    let rest = &info_text[label.end()..];

    let stop = DIRECTOR_STOP_TOKENS
        .iter()
        .filter_map(|token| rest.find(token))
        .min()
        .unwrap_or(rest.len());
    let segment = rest[..stop].split('/').next().unwrap_or_default();
    split_people(segment)
}

#[derive(Debug, Clone)]
pub struct ListingCrawl {
    pub max_pages: usize,
    pub per_page: usize,
    pub delay: Duration,
}

pub async fn crawl_listing(
    fetcher: &dyn HtmlFetcher,
    base_url: &str,
    parse: ListingParser,
    opts: &ListingCrawl,
) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for page_idx in 0..opts.max_pages {
        let start = page_idx * opts.per_page;
        let url = format!("{base_url}?start={start}&sort=time&rating=all&filter=all&mode=grid");

        let Some(html) = fetcher.fetch(&url).await else {
            tracing::warn!(url = %url, "listing fetch failed; treating as end of list");
            break;
        };

        let items = match parse(&html) {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(url = %url, error = %format!("{err:#}"), "listing parse failed; treating as end of list");
                break;
            }
        };
        if items.is_empty() {
            tracing::debug!(url = %url, "empty listing page; end of list");
            break;
        }

        tracing::info!(base_url, page = page_idx + 1, items = items.len(), "listing page");
        for item in items {
            if !seen.insert(item.subject_url.clone()) {
                tracing::warn!(subject_url = %item.subject_url, "duplicate subject url in listing; keeping first");
                continue;
            }
            records.push(item);
        }

        tokio::time::sleep(opts.delay).await;
    }

    records
}

pub async fn enrich_directors(fetcher: &dyn HtmlFetcher, movies: &mut [RawRecord], delay: Duration) {
    let total = movies.len();
    for (idx, movie) in movies.iter_mut().enumerate() {
        match fetcher.fetch(&movie.subject_url).await {
            Some(html) => match directors_from_detail(&html) {
                Ok(directors) => movie.people_source = directors,
                Err(err) => {
                    tracing::warn!(
                        subject_url = %movie.subject_url,
                        error = %format!("{err:#}"),
                        "director extraction failed"
                    );
                }
            },
            None => {
                tracing::warn!(subject_url = %movie.subject_url, "detail fetch failed; directors unknown");
            }
        }

        tracing::debug!(done = idx + 1, total, "directors: progress");
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Default)]
pub struct CrawlOutput {
    pub books: Vec<RawRecord>,
    pub movies: Vec<RawRecord>,
}

pub async fn crawl_all(
    fetcher: &dyn HtmlFetcher,
    config: &SourceConfig,
    opts: &ListingCrawl,
) -> CrawlOutput {
    tracing::info!("crawl books");
    let books = crawl_listing(fetcher, &config.book_collect_url(), parse_book_listing, opts).await;

    tracing::info!("crawl movies");
    let mut movies =
        crawl_listing(fetcher, &config.movie_collect_url(), parse_movie_listing, opts).await;
    enrich_directors(fetcher, &mut movies, config.detail_delay).await;

    tracing::info!(
        books = books.len(),
        movies = movies.len(),
        total = books.len() + movies.len(),
        "crawl summary"
    );
    CrawlOutput { books, movies }
}

pub async fn run(args: CrawlArgs) -> anyhow::Result<()> {
    let config = SourceConfig::from_env().context("load source config")?;
    let retry = crate::config::retry_policy_from_env().context("load retry policy")?;
    let out_dir = PathBuf::from(&args.out);

    let fetcher = HttpFetcher::new(
        FetchIdentity {
            user_agent: &config.user_agent,
            accept_language: None,
            cookie: Some(&config.cookie),
        },
        retry,
    )?;

    let opts = ListingCrawl {
        max_pages: args.max_pages,
        per_page: args.per_page.max(1),
        delay: Duration::from_millis(args.delay_ms),
    };
    let output = crawl_all(&fetcher, &config, &opts).await;

    crate::store::write_json(&out_dir.join(crate::store::BOOK_RAW_FILE), &output.books)
        .context("save raw books")?;
    crate::store::write_json(&out_dir.join(crate::store::MOVIE_RAW_FILE), &output.movies)
        .context("save raw movies")?;
    let all = output
        .books
        .iter()
        .chain(output.movies.iter())
        .collect::<Vec<_>>();
    crate::store::write_json(&out_dir.join(crate::store::ALL_RAW_FILE), &all)
        .context("save merged raw export")?;

    tracing::info!(out = %out_dir.display(), items = all.len(), "crawl complete");
    Ok(())
}
