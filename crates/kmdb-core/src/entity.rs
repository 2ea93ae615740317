use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Kind of a named entity, shared by NER output, canonical keywords and links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Person,
    Institution,
    Place,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Person, EntityKind::Institution, EntityKind::Place];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Institution => "institution",
            EntityKind::Place => "place",
        }
    }

    /// Only institutions and places carry a synonym-alias table.
    pub fn has_synonyms(&self) -> bool {
        !matches!(self, EntityKind::Person)
    }

    /// File stem of the synonym table, e.g. `places_synonym.csv`.
    pub fn synonym_file_name(&self) -> Option<&'static str> {
        match self {
            EntityKind::Person => None,
            EntityKind::Institution => Some("institutions_synonym.csv"),
            EntityKind::Place => Some("places_synonym.csv"),
        }
    }

    fn from_ner_tag(tag: &str) -> Option<Self> {
        match tag {
            "PER" => Some(EntityKind::Person),
            "ORG" => Some(EntityKind::Institution),
            "LOC" => Some(EntityKind::Place),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(EntityKind::Person),
            "institution" => Ok(EntityKind::Institution),
            "place" => Ok(EntityKind::Place),
            _ => Err(format!("Unknown entity kind: {}", s)),
        }
    }
}

/// Relevance sub-label the NER model attaches to each span.
///
/// Ordered so that `Positive > Negative`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityLabel {
    Negative,
    Positive,
}

impl EntityLabel {
    pub fn from_bool(positive: bool) -> Self {
        if positive {
            EntityLabel::Positive
        } else {
            EntityLabel::Negative
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityLabel::Negative => "negative",
            EntityLabel::Positive => "positive",
        }
    }
}

impl FromStr for EntityLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "negative" => Ok(EntityLabel::Negative),
            "positive" => Ok(EntityLabel::Positive),
            _ => Err(format!("Unknown entity label: {}", s)),
        }
    }
}

/// Parsed `entity_group` of a NER span: `<POS|NEG>_<PER|ORG|LOC>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityGroup {
    pub label: EntityLabel,
    pub kind: Option<EntityKind>,
}

impl FromStr for EntityGroup {
    type Err = AppError;

    /// A well-formed group with an unsupported kind (e.g. `POS_MISC`) parses
    /// with `kind: None`; a malformed label is an error.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, tag) = s.split_once('_').ok_or_else(|| {
            AppError::InvalidCollaboratorOutput(format!("entity group '{s}' has no separator"))
        })?;
        let label = match label {
            "POS" => EntityLabel::Positive,
            "NEG" => EntityLabel::Negative,
            other => {
                return Err(AppError::InvalidCollaboratorOutput(format!(
                    "entity group '{s}' has unknown label '{other}'"
                )));
            }
        };
        Ok(EntityGroup {
            label,
            kind: EntityKind::from_ner_tag(tag),
        })
    }
}

/// One span as returned by the NER collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerSpan {
    #[serde(alias = "word", alias = "surface_text")]
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub entity_group: String,
}

/// A validated span, ready for resolution. Never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedEntity {
    pub kind: EntityKind,
    pub surface_form: String,
    /// Filled in by the resolver's grouping step.
    pub lemma: Option<String>,
    pub char_start: usize,
    pub char_end: usize,
    pub score: f64,
    pub label: EntityLabel,
}

/// An authoritative reference-database entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalKeyword {
    pub id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub usage_frequency: i64,
}

/// Resolver output for one lemma group, not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEntityLink {
    pub kind: EntityKind,
    pub keyword_id: Option<i64>,
    pub keyword_name: Option<String>,
    pub raw_surface: String,
    pub normalized_surface: String,
    pub char_offset: usize,
    pub score: f64,
    pub label: EntityLabel,
    /// Number of detections folded into this link.
    pub detections: u32,
}

/// A persisted article-to-keyword association.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityLink {
    pub id: i64,
    pub article_id: i64,
    pub kind: EntityKind,
    pub keyword_id: Option<i64>,
    pub raw_surface: String,
    pub normalized_surface: String,
    pub char_offset: usize,
    pub score: f64,
    pub label: EntityLabel,
}
