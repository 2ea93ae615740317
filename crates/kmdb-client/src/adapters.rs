//! Per-outlet overrides for pages the generic extractor handles badly.

use kmdb_core::error::AppError;
use kmdb_core::traits::{OutletAdapter, OutletRegistry};
use scraper::Selector;
use url::Url;

use crate::extractor::{element_text, parse_html};

const MEDIAWORKS_HOSTS: &[&str] = &[
    "www.baon.hu",
    "www.bama.hu",
    "www.beol.hu",
    "www.boon.hu",
    "www.delmagyar.hu",
    "www.duol.hu",
    "www.feol.hu",
    "www.haon.hu",
    "www.heol.hu",
    "www.szoljon.hu",
    "www.kemma.hu",
    "www.nool.hu",
    "www.sonline.hu",
    "www.szon.hu",
    "www.teol.hu",
    "www.vaol.hu",
    "www.veol.hu",
    "www.zaol.hu",
    "mandiner.hu",
    "magyarnemzet.hu",
    "szabadfold.hu",
    "www.origo.hu",
    "www.vg.hu",
    "www.borsonline.hu",
    "ripost.hu",
    "metropol.hu",
];

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_lowercase)
}

fn selector(s: &str) -> Result<Selector, AppError> {
    Selector::parse(s).map_err(|e| AppError::ConfigError(format!("Invalid selector '{s}': {e:?}")))
}

enum DescriptionRule {
    /// `content` attribute of the first matching element.
    Attribute(Selector),
    /// Text of the first matching element.
    FirstText(Selector),
}

/// Adapter for an exact list of hosts, driven by CSS selectors.
pub struct SelectorAdapter {
    name: &'static str,
    hosts: &'static [&'static str],
    text: Option<Selector>,
    description: Option<DescriptionRule>,
}

impl SelectorAdapter {
    pub fn new(name: &'static str, hosts: &'static [&'static str]) -> Self {
        Self {
            name,
            hosts,
            text: None,
            description: None,
        }
    }

    /// Body is every non-empty match of `s`, joined by newlines.
    pub fn with_text(mut self, s: &str) -> Result<Self, AppError> {
        self.text = Some(selector(s)?);
        Ok(self)
    }

    /// Description is the `content` of the first `s` match (a meta tag).
    pub fn with_meta_description(mut self, s: &str) -> Result<Self, AppError> {
        self.description = Some(DescriptionRule::Attribute(selector(s)?));
        Ok(self)
    }

    /// Description is the text of the first `s` match.
    pub fn with_text_description(mut self, s: &str) -> Result<Self, AppError> {
        self.description = Some(DescriptionRule::FirstText(selector(s)?));
        Ok(self)
    }
}

impl OutletAdapter for SelectorAdapter {
    fn name(&self) -> &str {
        self.name
    }

    fn matches(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| self.hosts.contains(&host.as_str()))
    }

    fn description(&self, html: &str) -> Option<String> {
        let document = parse_html(html);
        let description = match self.description.as_ref()? {
            DescriptionRule::Attribute(sel) => document
                .select(sel)
                .next()?
                .value()
                .attr("content")?
                .trim()
                .to_string(),
            DescriptionRule::FirstText(sel) => element_text(document.select(sel).next()?),
        };
        (!description.is_empty()).then_some(description)
    }

    fn text(&self, html: &str) -> Option<String> {
        let sel = self.text.as_ref()?;
        let document = parse_html(html);
        let text = document
            .select(sel)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        (!text.is_empty()).then_some(text)
    }
}

/// hvg.hu and its subdomains: the headline sits in `<title>` between a
/// rubric prefix (`Itthon: `) and a site suffix (`| hvg.hu`).
pub struct HvgAdapter {
    title: Selector,
}

impl HvgAdapter {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self {
            title: selector("title")?,
        })
    }
}

/// Strip the last `|` segment, then the first `:` segment.
pub fn clean_hvg_title(raw: &str) -> String {
    let mut title = raw;
    if let Some((head, _)) = title.rsplit_once('|') {
        title = head;
    }
    if let Some((_, tail)) = title.split_once(':') {
        title = tail;
    }
    title.trim().to_string()
}

impl OutletAdapter for HvgAdapter {
    fn name(&self) -> &str {
        "hvg"
    }

    fn matches(&self, url: &str) -> bool {
        host_of(url).is_some_and(|host| host.ends_with("hvg.hu"))
    }

    fn title(&self, html: &str) -> Option<String> {
        let document = parse_html(html);
        let raw = element_text(document.select(&self.title).next()?);
        let title = clean_hvg_title(&raw);
        (!title.is_empty()).then_some(title)
    }
}

/// The adapters in precedence order.
pub fn default_registry() -> Result<OutletRegistry, AppError> {
    Ok(OutletRegistry::new()
        .register(
            SelectorAdapter::new("telex", &["telex.hu"])
                .with_text("div.article-html-content p")?,
        )
        .register(
            SelectorAdapter::new("atv", &["atv.hu", "www.atv.hu"])
                .with_meta_description("meta[name='twitter:description']")?,
        )
        .register(SelectorAdapter::new("mediaworks", MEDIAWORKS_HOSTS).with_text(
            ".block-content p, .block-content li, .article-text-formatter p, .article-text-formatter li",
        )?)
        .register(HvgAdapter::new()?)
        .register(
            SelectorAdapter::new("propeller", &["propeller.hu", "www.propeller.hu"])
                .with_text_description("div.entry-content p")?,
        ))
}
