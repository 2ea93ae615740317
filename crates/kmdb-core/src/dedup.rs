//! Source-attribution heuristic.
//!
//! Decides whether an article credits another outlet for its story ("írja a
//! Telex", "Index: ...", "... (hvg.hu)"). Such articles are republished
//! scoops and are skipped by the download stage.
//!
//! Every input is normalized the same way (lowercase, spaces and periods
//! removed) before matching, so `"írja a telex.hu"` and `"írja a telexhu"`
//! are the same phrase. Alias matching is substring-based: short aliases
//! such as `"rtl"` or `"lap"` can fire inside unrelated words.

use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Reference-database id of a news outlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutletId(pub i32);

impl OutletId {
    /// Attribution to "the paper" / "the portal" without naming it.
    pub const UNATTRIBUTED: OutletId = OutletId(0);
}

impl fmt::Display for OutletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tracked outlet and the names it is credited under.
#[derive(Debug)]
pub struct Outlet {
    pub id: OutletId,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

pub static OUTLETS: &[Outlet] = &[
    Outlet { id: OutletId(1), name: "444", aliases: &["444", "444.hu"] },
    Outlet { id: OutletId(2), name: "24.hu", aliases: &["24.hu"] },
    Outlet { id: OutletId(3), name: "Index", aliases: &["index"] },
    Outlet { id: OutletId(4), name: "Telex", aliases: &["telex"] },
    Outlet { id: OutletId(5), name: "Origo", aliases: &["origo"] },
    Outlet { id: OutletId(6), name: "Magyar Nemzet", aliases: &["magyarnemzet"] },
    Outlet { id: OutletId(7), name: "G7", aliases: &["g7"] },
    Outlet { id: OutletId(8), name: "Népszava", aliases: &["népszava"] },
    Outlet { id: OutletId(9), name: "Bank360", aliases: &["bank360"] },
    Outlet { id: OutletId(10), name: "HVG", aliases: &["hvg", "hvg.hu"] },
    Outlet { id: OutletId(11), name: "BBC", aliases: &["bbc"] },
    Outlet { id: OutletId(12), name: "ATV", aliases: &["atv"] },
    Outlet { id: OutletId(13), name: "Átlátszó", aliases: &["átlátszó", "atlatszo.hu"] },
    Outlet { id: OutletId(14), name: "Válasz Online", aliases: &["válasz online", "valaszonline.hu"] },
    Outlet { id: OutletId(15), name: "Szabad Európa", aliases: &["szabad európa"] },
    Outlet { id: OutletId(16), name: "Media1", aliases: &["media1"] },
    Outlet { id: OutletId(17), name: "RTL", aliases: &["rtl"] },
    Outlet { id: OutletId(18), name: "Mfor", aliases: &["mfor", "mfor.hu"] },
    Outlet { id: OutletId(19), name: "Pénzcentrum", aliases: &["pénzcentrum"] },
    Outlet { id: OutletId::UNATTRIBUTED, name: "(unnamed outlet)", aliases: &["lap", "portál", "újság", "hírportál"] },
];

const CREDIT_VERBS: &[&str] = &[
    "írja",
    "írta",
    "írta meg",
    "tudta meg",
    "számolt be",
    "számolt be az esetről",
    "mondta",
    "szúrta ki",
];
const ARTICLES: &[&str] = &["a", "az"];
const DATIVE_SUFFIXES: &[&str] = &["-nak", "nak", "-nek", "nek"];

/// Which rule produced an attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributionRule {
    /// `"Index: ..."` title prefix.
    TitlePrefix,
    /// Attribution phrase in the description or body.
    Phrase,
    /// Body ends with `"(outlet)"`.
    TrailingCredit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribution {
    pub outlet: OutletId,
    pub rule: AttributionRule,
    /// The normalized alias or phrase that matched.
    pub matched: String,
}

/// Lowercase and drop spaces and periods.
pub fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

struct Phrase {
    text: String,
    outlet: OutletId,
}

/// Normalized aliases in table order.
static ALIASES: LazyLock<Vec<(String, OutletId)>> = LazyLock::new(|| {
    OUTLETS
        .iter()
        .flat_map(|o| o.aliases.iter().map(move |a| (normalize(a), o.id)))
        .collect()
});

/// Cross product of every attribution template with every alias, in
/// template order, then prefix, alias and suffix order.
static PHRASES: LazyLock<Vec<Phrase>> = LazyLock::new(|| {
    let credit_prefixes: Vec<String> = CREDIT_VERBS
        .iter()
        .flat_map(|v| ARTICLES.iter().map(move |a| format!("{v} {a} ")))
        .collect();
    let interview: Vec<String> = DATIVE_SUFFIXES
        .iter()
        .map(|s| format!("{s} adott interjú"))
        .collect();
    let owns = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let templates: Vec<(Vec<String>, Vec<String>)> = vec![
        (credit_prefixes, owns(&[""])),
        (owns(&[""]), interview),
        (owns(&["elismerte a ", "elismerte az "]), owns(DATIVE_SUFFIXES)),
        (
            owns(&[""]),
            owns(&[" vette észre", " azt írja", " bukkant rá", " kiderítette"]),
        ),
        (owns(&["derül ki a "]), owns(&[" riportjából"])),
        (owns(&[""]), owns(&[" riportjából kiderül", " riportja szerint"])),
        (owns(&[""]), owns(&[" szerint"])),
    ];

    let mut phrases = Vec::new();
    for (prefixes, suffixes) in &templates {
        for prefix in prefixes {
            for (alias, outlet) in ALIASES.iter() {
                for suffix in suffixes {
                    phrases.push(Phrase {
                        text: normalize(&format!("{prefix}{alias}{suffix}")),
                        outlet: *outlet,
                    });
                }
            }
        }
    }
    phrases
});

fn lookup_alias(normalized: &str) -> Option<OutletId> {
    ALIASES
        .iter()
        .find(|(alias, _)| alias == normalized)
        .map(|(_, id)| *id)
}

/// Run the attribution rules in priority order; the first match wins.
pub fn attribute(title: &str, description: &str, text: &str) -> Option<Attribution> {
    if let Some((prefix, _)) = title.split_once(':') {
        let prefix = normalize(prefix);
        if let Some(outlet) = lookup_alias(&prefix) {
            return Some(Attribution {
                outlet,
                rule: AttributionRule::TitlePrefix,
                matched: prefix,
            });
        }
    }

    let description = normalize(description);
    let body = normalize(text);

    for phrase in PHRASES.iter() {
        if description.contains(&phrase.text) || body.contains(&phrase.text) {
            return Some(Attribution {
                outlet: phrase.outlet,
                rule: AttributionRule::Phrase,
                matched: phrase.text.clone(),
            });
        }
    }

    let body = body.trim_end();
    if let Some(inner) = body.strip_suffix(')') {
        if let Some(open) = inner.rfind('(') {
            let credit = &inner[open + '('.len_utf8()..];
            if let Some(outlet) = lookup_alias(credit) {
                return Some(Attribution {
                    outlet,
                    rule: AttributionRule::TrailingCredit,
                    matched: credit.to_string(),
                });
            }
        }
    }

    None
}

/// Outlet the story is attributed to, if any.
pub fn detect_source(title: &str, description: &str, text: &str) -> Option<OutletId> {
    attribute(title, description, text).map(|a| a.outlet)
}
