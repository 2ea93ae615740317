//! Cleanup of extracted article text.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::AppError;

/// Applied in order to both title and body.
const REPLACEMENT_PATTERNS: &[(&str, &str)] = &[
    (r"Fotó: .*", ""),
    (r"[”“„]", "\""),
    (r"…", "..."),
    (
        r"(?m)^\d{4}\. \S+ \d{2}\., \S+, \d{2}:\d{2} • .*$|^Szerző: .*$|^Címkék: .*$|^Kiemelt kép: .*$",
        "",
    ),
    (r"  +", " "),
    (r"–", "-"),
    (r"photo_camera", ""),
    (r"\n{3,}", "\n\n"),
];

static REPLACEMENTS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    REPLACEMENT_PATTERNS
        .iter()
        .map(|(pattern, replacement)| {
            (Regex::new(pattern).expect("valid replacement pattern"), *replacement)
        })
        .collect()
});

/// Outlet names that portals append or prepend to their titles.
const TITLE_AFFIXES: &[&str] = &[
    " | atlatszo.hu",
    " | G7 - Gazdasági sztorik érthetően",
    " - ORIGO",
    " | 24.hu",
    "FEOL - ",
    " - PestiSrácok",
    " | BorsOnline",
    " - Blikk",
    "BEOL - ",
    "VAOL - ",
    "KEMMA - ",
    "HírExtra - ",
    "DUOL - ",
    "SZOLJON - ",
    "HEOL - ",
    " - Mandiner",
    " - Greenfo",
    "BAMA - ",
    "BOON - ",
    " - pecsma.hu",
    " - Direkt36",
    " | hvg.hu",
];

const COMMON_DESCRIPTIONS_FILE: &str = "common_descriptions.txt";
const COMMON_LINES_FILE: &str = "common_lines.txt";

/// Banners that mark the rest of the article as subscriber-only.
const PAYWALL_BANNERS: &[&str] = &[
    "Csatlakozz a Körhöz, és olvass tovább!",
    "A teljes cikket előfizetőink olvashatják el.",
    "A keresett cikk a portfolio.hu hírarchívumához tartozik, melynek olvasása előfizetéses regisztrációhoz kötött.",
    "Ez a cikk folytatódik, de csak Portfolio Signature előfizetéssel olvasható tovább.",
    "Ez egy remek cikk a nyomtatott Magyar Narancsból, amely online is elérhető.",
    "A cikk innentől csak a Qubit+ előfizetőinek elérhető. Csatlakozz, és olvass tovább!",
];

const DESCRIPTION_MAX_CHARS: usize = 400;

/// Normalize quotes, dashes and ellipses and remove photo captions, bylines
/// and repeated whitespace.
pub fn clean(text: &str) -> String {
    let mut out = text.to_string();
    for (re, replacement) in REPLACEMENTS.iter() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_string()
}

/// Description derived from the first paragraph when the page has none.
///
/// Cut after the last sentence end within the first 400 characters, or at
/// 400 characters when there is no period. Single-line texts yield `None`.
pub fn fallback_description(text: &str) -> Option<String> {
    if text.matches('\n').count() <= 1 {
        return None;
    }
    let first_line = text.lines().next()?;
    let head: String = first_line.chars().take(DESCRIPTION_MAX_CHARS).collect();
    let description = match head.rfind('.') {
        Some(pos) => head[..pos + 1].to_string(),
        None => head,
    };
    Some(description)
}

/// Remove outlet names from a title, e.g. `"Cím | 24.hu"` becomes `"Cím"`.
pub fn trim_title(title: &str) -> String {
    TITLE_AFFIXES
        .iter()
        .fold(title.to_string(), |acc, affix| acc.replace(affix, ""))
}

/// Site-wide boilerplate: default meta descriptions and recurring body lines
/// (newsletter prompts, share buttons) that say nothing about the article.
///
/// Read from `common_descriptions.txt` and `common_lines.txt`, one entry
/// per line.
#[derive(Debug, Clone, Default)]
pub struct Boilerplate {
    descriptions: Vec<String>,
    lines: Vec<String>,
}

impl Boilerplate {
    pub fn new(descriptions: Vec<String>, lines: Vec<String>) -> Self {
        let keep = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            descriptions: keep(descriptions),
            lines: keep(lines),
        }
    }

    /// Load both lists from `dir`. A missing file means an empty list.
    pub fn load(dir: &Path) -> Result<Self, AppError> {
        let boilerplate = Self::new(
            read_entries(&dir.join(COMMON_DESCRIPTIONS_FILE))?,
            read_entries(&dir.join(COMMON_LINES_FILE))?,
        );
        tracing::info!(
            descriptions = boilerplate.descriptions.len(),
            lines = boilerplate.lines.len(),
            "Loaded boilerplate lists"
        );
        Ok(boilerplate)
    }

    /// Remove every known default description from `description`.
    pub fn strip_description(&self, description: &str) -> String {
        self.descriptions
            .iter()
            .fold(description.to_string(), |acc, common| acc.replace(common, ""))
            .trim()
            .to_string()
    }

    /// Drop whole lines of `text` that are known boilerplate.
    pub fn strip_lines(&self, text: &str) -> String {
        if self.lines.is_empty() {
            return text.to_string();
        }
        text.lines()
            .filter(|line| !self.lines.iter().any(|common| line.trim() == common))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn read_entries(path: &Path) -> Result<Vec<String>, AppError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().map(str::to_string).collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Boilerplate list not found, nothing will be stripped");
            Ok(Vec::new())
        }
        Err(e) => Err(AppError::ConfigError(format!(
            "Failed to read {}: {e}",
            path.display()
        ))),
    }
}

pub fn is_paywalled(url: &str, html: &str) -> bool {
    url.contains("hvg.hu/360/") || PAYWALL_BANNERS.iter().any(|b| html.contains(b))
}

/// Keep full names only; single tokens are usually section or outlet names.
pub fn join_authors(authors: &[String]) -> String {
    authors
        .iter()
        .map(|a| a.trim())
        .filter(|a| a.contains(' '))
        .collect::<Vec<_>>()
        .join(",")
}
