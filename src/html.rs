use scraper::{ElementRef, Selector};

pub fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow::anyhow!("parse selector {css:?}: {err:?}"))
}

pub fn select_first<'a>(
    scope: ElementRef<'a>,
    candidates: &[&str],
) -> anyhow::Result<Option<ElementRef<'a>>> {
    for css in candidates {
        let sel = selector(css)?;
        if let Some(found) = scope.select(&sel).next() {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

pub fn text_of(el: ElementRef<'_>, sep: &str) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

pub fn attr_trimmed(el: ElementRef<'_>, name: &str) -> String {
    el.value().attr(name).unwrap_or_default().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use scraper::Html;

    use super::*;

    #[test]
    fn text_of_trims_and_joins_segments() -> anyhow::Result<()> {
        let doc = Html::parse_fragment("<div> 导演 <span> 张艺谋 </span>\n</div>");
        let div = select_first(doc.root_element(), &["div"])?
            .ok_or_else(|| anyhow::anyhow!("missing div"))?;
        assert_eq!(text_of(div, " "), "导演 张艺谋");
        assert_eq!(text_of(div, ""), "导演张艺谋");
        Ok(())
    }

    #[test]
    fn select_first_falls_through_candidates() -> anyhow::Result<()> {
        let doc = Html::parse_fragment(r#"<a class="nbg" href=" /s/1 ">x</a>"#);
        let a = select_first(doc.root_element(), &["li.title a", "a.nbg"])?
            .ok_or_else(|| anyhow::anyhow!("missing anchor"))?;
        assert_eq!(attr_trimmed(a, "href"), "/s/1");
        Ok(())
    }

    #[test]
    fn selector_reports_invalid_css() {
        assert!(selector("a[").is_err());
    }
}
