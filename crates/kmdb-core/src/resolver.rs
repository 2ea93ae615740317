//! Entity resolution: maps detected names onto canonical keywords.
//!
//! Per kind, detections are grouped by lemma, each group collects candidate
//! keywords from several matching rules, article-internal short forms are
//! folded into their long form ("Kiss" into "Kiss Bandi"), and the first
//! non-empty candidate column decides the keyword. One link is emitted per
//! resolved keyword, or per unresolved root group.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::entity::{DetectedEntity, EntityKind, NewEntityLink};
use crate::error::AppError;
use crate::keywords::{KeywordCache, KeywordUniverse};
use crate::ner::split_by_kind;
use crate::traits::{KeywordSource, Lemmatizer};

const COMPANY_FORMS: &[&str] = &["Kft", "Zrt", "Kht", "Nyrt", "Bt"];

/// Detections of one kind that share a lemma.
#[derive(Debug, Clone, PartialEq)]
pub struct LemmaGroup {
    /// Lemma as first seen.
    pub lemma: String,
    key: String,
    /// Highest-ranked detection of the group.
    pub best: DetectedEntity,
    pub detections: u32,
}

impl LemmaGroup {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Label desc, score desc, offset asc.
fn rank(a: &DetectedEntity, b: &DetectedEntity) -> Ordering {
    b.label
        .cmp(&a.label)
        .then_with(|| b.score.total_cmp(&a.score))
        .then_with(|| a.char_start.cmp(&b.char_start))
}

/// Group detections by lowercased lemma, preserving first-seen order.
///
/// `lemmas` maps each surface form to its lemma.
pub fn group_by_lemma(
    entities: &[DetectedEntity],
    lemmas: &HashMap<String, String>,
) -> Vec<LemmaGroup> {
    let mut ordered: Vec<&DetectedEntity> = entities.iter().collect();
    ordered.sort_by_key(|e| (e.char_start, e.char_end));

    let mut groups: Vec<LemmaGroup> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for entity in ordered {
        let lemma = lemmas
            .get(&entity.surface_form)
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .unwrap_or(entity.surface_form.as_str())
            .to_string();
        let key = lemma.to_lowercase();
        let mut detection = entity.clone();
        detection.lemma = Some(lemma.clone());

        match index.get(&key) {
            Some(&i) => {
                let group = &mut groups[i];
                group.detections += 1;
                if rank(&detection, &group.best) == Ordering::Less {
                    group.best = detection;
                }
            }
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(LemmaGroup {
                    lemma,
                    key,
                    best: detection,
                    detections: 1,
                });
            }
        }
    }
    groups
}

/// Keyword indexes per matching rule, each in universe preference order.
#[derive(Debug, Clone, Default, PartialEq)]
struct Candidates {
    identical: Vec<usize>,
    keyword_contains_entity: Vec<usize>,
    entity_contains_keyword: Vec<usize>,
    synonym: Vec<usize>,
}

impl Candidates {
    fn collect(key: &str, universe: &KeywordUniverse) -> Self {
        let mut c = Candidates::default();
        if let Some(idx) = universe.identical(key) {
            c.identical.push(idx);
        }
        for (idx, name) in universe.lowercase_names() {
            if name.contains(key) {
                c.keyword_contains_entity.push(idx);
            }
            if name != key && key.contains(name) {
                c.entity_contains_keyword.push(idx);
            }
        }
        if universe.kind().has_synonyms() {
            if let Some(idx) = universe.synonym(key) {
                c.synonym.push(idx);
            }
        }
        c
    }

    /// First non-empty column, first (most frequent) keyword within it.
    fn combine(&self) -> Option<usize> {
        [
            &self.identical,
            &self.keyword_contains_entity,
            &self.entity_contains_keyword,
            &self.synonym,
        ]
        .into_iter()
        .find_map(|column| column.first().copied())
    }
}

/// Follow fold targets until a group that does not fold.
///
/// Each hop moves to a strictly longer key, so the walk is bounded by the
/// number of groups.
fn fold_root(start: usize, targets: &[Option<usize>]) -> usize {
    let mut current = start;
    for _ in 0..targets.len() {
        match targets[current] {
            Some(next) => current = next,
            None => break,
        }
    }
    current
}

fn add_company_period(name: &str) -> String {
    let last = name.split_whitespace().last().unwrap_or_default();
    if COMPANY_FORMS.iter().any(|form| form.eq_ignore_ascii_case(last)) {
        format!("{name}.")
    } else {
        name.to_string()
    }
}

fn best_member(groups: &[LemmaGroup], members: impl Iterator<Item = usize>) -> Option<usize> {
    members.min_by(|&a, &b| rank(&groups[a].best, &groups[b].best))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LinkKey {
    Keyword(usize),
    Unresolved(usize),
}

/// Resolve lemma groups of one kind against its keyword universe.
pub fn resolve_groups(
    kind: EntityKind,
    groups: &[LemmaGroup],
    universe: &KeywordUniverse,
) -> Vec<NewEntityLink> {
    let candidates: Vec<Candidates> = groups
        .iter()
        .map(|g| Candidates::collect(&g.key, universe))
        .collect();

    // A group folds into the last other group containing it, unless it
    // matches a keyword exactly.
    let targets: Vec<Option<usize>> = groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            if !candidates[i].identical.is_empty() {
                return None;
            }
            groups
                .iter()
                .enumerate()
                .filter(|(j, other)| *j != i && other.key.contains(&g.key))
                .map(|(j, _)| j)
                .last()
        })
        .collect();

    let roots: Vec<usize> = (0..groups.len()).map(|i| fold_root(i, &targets)).collect();

    let mut buckets: Vec<(LinkKey, Vec<usize>)> = Vec::new();
    for (i, &root) in roots.iter().enumerate() {
        let key = match candidates[root].combine() {
            Some(idx) => LinkKey::Keyword(idx),
            None => LinkKey::Unresolved(root),
        };
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(i),
            None => buckets.push((key, vec![i])),
        }
    }

    let mut links = Vec::with_capacity(buckets.len());
    for (key, members) in buckets {
        let Some(best) = best_member(groups, members.iter().copied()) else {
            continue;
        };
        let named_by = best_member(groups, members.iter().copied().filter(|&m| roots[m] == m))
            .unwrap_or(best);
        let detection = &groups[best].best;

        let keyword = match key {
            LinkKey::Keyword(idx) => universe.get(idx),
            LinkKey::Unresolved(_) => None,
        };
        let mut normalized = groups[named_by].lemma.clone();

        if keyword.is_none() && kind == EntityKind::Person && !normalized.contains(char::is_whitespace) {
            tracing::debug!(lemma = %normalized, "Dropping unresolved single-word person");
            continue;
        }
        if kind == EntityKind::Institution {
            normalized = add_company_period(&normalized);
        }

        links.push(NewEntityLink {
            kind,
            keyword_id: keyword.map(|k| k.id),
            keyword_name: keyword.map(|k| k.name.clone()),
            raw_surface: detection.surface_form.clone(),
            normalized_surface: normalized,
            char_offset: detection.char_start,
            score: detection.score,
            label: detection.label,
            detections: members.iter().map(|&m| groups[m].detections).sum(),
        });
    }
    links.sort_by_key(|l| l.char_offset);
    links
}

/// Fail if two links of one article share a character offset.
pub fn check_unique_offsets(links: &[NewEntityLink]) -> Result<(), AppError> {
    let mut seen = HashSet::with_capacity(links.len());
    for link in links {
        if !seen.insert(link.char_offset) {
            return Err(AppError::InvariantViolation(format!(
                "two entity links at offset {} ('{}')",
                link.char_offset, link.raw_surface
            )));
        }
    }
    Ok(())
}

/// Lemmatizes detections and resolves them against cached keyword universes.
#[derive(Clone)]
pub struct EntityResolver<L: Lemmatizer, S: KeywordSource> {
    lemmatizer: L,
    keywords: KeywordCache<S>,
}

impl<L: Lemmatizer, S: KeywordSource> EntityResolver<L, S> {
    pub fn new(lemmatizer: L, keywords: KeywordCache<S>) -> Self {
        Self {
            lemmatizer,
            keywords,
        }
    }

    pub fn keywords(&self) -> &KeywordCache<S> {
        &self.keywords
    }

    /// Lemmatize each distinct surface form once.
    async fn lemmas(
        &self,
        entities: &[DetectedEntity],
    ) -> Result<HashMap<String, String>, AppError> {
        let mut lemmas = HashMap::new();
        for entity in entities {
            if lemmas.contains_key(&entity.surface_form) {
                continue;
            }
            let lemma = self.lemmatizer.lemmatize(&entity.surface_form).await?;
            lemmas.insert(entity.surface_form.clone(), lemma);
        }
        Ok(lemmas)
    }

    /// Resolve detections of a single kind.
    pub async fn resolve_kind(
        &self,
        kind: EntityKind,
        entities: &[DetectedEntity],
    ) -> Result<Vec<NewEntityLink>, AppError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let lemmas = self.lemmas(entities).await?;
        let groups = group_by_lemma(entities, &lemmas);
        let universe = self.keywords.get(kind).await?;
        Ok(resolve_groups(kind, &groups, &universe))
    }

    /// Resolve every kind of an article and check offset uniqueness across
    /// the combined result.
    pub async fn resolve(
        &self,
        entities: Vec<DetectedEntity>,
    ) -> Result<Vec<NewEntityLink>, AppError> {
        let mut links = Vec::new();
        for (kind, detected) in split_by_kind(entities) {
            links.extend(self.resolve_kind(kind, &detected).await?);
        }
        check_unique_offsets(&links)?;
        links.sort_by_key(|l| l.char_offset);
        Ok(links)
    }
}
