use chrono::{DateTime, Utc};
use kmdb_core::error::AppError;
use kmdb_core::traits::{ArticleExtractor, ExtractedArticle};
use scraper::{ElementRef, Html, Selector};

/// Containers tried in order for the article body.
const CONTENT_SELECTORS: &[&str] = &[
    "article",
    "main",
    "[role='main']",
    ".content",
    ".post-content",
    ".entry-content",
    "#content",
];

/// Outlet-agnostic extractor built on `scraper`.
///
/// Reads OpenGraph/meta tags for title, description, authors and
/// publication date, and the paragraphs of the first matching content
/// container for the body.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlArticleExtractor;

impl HtmlArticleExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ArticleExtractor for HtmlArticleExtractor {
    fn extract(&self, url: &str, html: &str) -> Result<ExtractedArticle, AppError> {
        if html.trim().is_empty() {
            return Err(AppError::ExtractionError(format!("Empty document for {url}")));
        }

        let document = parse_html(html);
        let article = ExtractedArticle {
            title: extract_title(&document),
            description: meta_content(&document, "description")
                .or_else(|| meta_content(&document, "og:description"))
                .unwrap_or_default(),
            text: extract_text(&document),
            authors: extract_authors(&document),
            pub_date: extract_pub_date(&document),
        };

        if article.title.is_empty() && article.text.is_empty() {
            return Err(AppError::ExtractionError(format!(
                "No title or body found in {url}"
            )));
        }
        Ok(article)
    }
}

/// Parse with `<br>` turned into newlines so paragraph text keeps line breaks.
pub(crate) fn parse_html(html: &str) -> Html {
    let html = html
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");
    Html::parse_document(&html)
}

/// `content` of `<meta name=...>` or `<meta property=...>`.
pub(crate) fn meta_content(document: &Html, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[name='{key}'], meta[property='{key}']")).ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .find(|c| !c.is_empty())
}

pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(element_text)
        .find(|t| !t.is_empty())
}

fn extract_title(document: &Html) -> String {
    meta_content(document, "og:title")
        .or_else(|| first_text(document, "title"))
        .or_else(|| first_text(document, "h1"))
        .unwrap_or_default()
}

fn extract_text(document: &Html) -> String {
    let Ok(paragraphs) = Selector::parse("p") else {
        return String::new();
    };

    for container in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(container) else {
            continue;
        };
        if let Some(el) = document.select(&selector).next() {
            let text = el
                .select(&paragraphs)
                .map(element_text)
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            if !text.is_empty() {
                return text;
            }
        }
    }

    // no recognisable container: every paragraph on the page
    document
        .select(&paragraphs)
        .map(element_text)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_authors(document: &Html) -> Vec<String> {
    let mut authors: Vec<String> = Vec::new();
    let raw = meta_content(document, "author").or_else(|| meta_content(document, "article:author"));
    for name in raw.iter().flat_map(|r| r.split(',')) {
        let name = name.trim();
        if !name.is_empty() && !authors.iter().any(|a| a == name) {
            authors.push(name.to_string());
        }
    }
    authors
}

fn extract_pub_date(document: &Html) -> Option<DateTime<Utc>> {
    let raw = meta_content(document, "article:published_time").or_else(|| {
        let selector = Selector::parse("time[datetime]").ok()?;
        document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("datetime"))
            .map(str::to_string)
    })?;

    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
