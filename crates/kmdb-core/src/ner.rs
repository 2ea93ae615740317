//! Post-processing of raw NER spans into typed detections.

use crate::entity::{DetectedEntity, EntityGroup, EntityKind, EntityLabel, NerSpan};
use crate::error::AppError;

/// Spans this short (in chars, before hyphen stripping) are noise.
const MIN_SPAN_CHARS: usize = 4;

#[derive(Debug, Clone)]
struct TypedSpan {
    text: String,
    start: usize,
    end: usize,
    score: f64,
    label: EntityLabel,
    kind: Option<EntityKind>,
}

fn validate(span: NerSpan) -> Result<TypedSpan, AppError> {
    let group: EntityGroup = span.entity_group.parse()?;
    if span.end < span.start {
        return Err(AppError::InvalidCollaboratorOutput(format!(
            "span '{}' ends before it starts ({}..{})",
            span.text, span.start, span.end
        )));
    }
    if !(0.0..=1.0).contains(&span.score) {
        return Err(AppError::InvalidCollaboratorOutput(format!(
            "span '{}' has score {} outside [0, 1]",
            span.text, span.score
        )));
    }
    Ok(TypedSpan {
        text: span.text,
        start: span.start,
        end: span.end,
        score: span.score,
        label: group.label,
        kind: group.kind,
    })
}

/// Join spans the tagger split without a gap, e.g. `"Buda"` + `"pest"`.
///
/// The merged span keeps the first half's kind, averages the scores and is
/// positive if either half is.
fn merge_adjacent(spans: Vec<TypedSpan>) -> Vec<TypedSpan> {
    let mut merged: Vec<TypedSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(prev) if prev.end == span.start => {
                prev.text.push_str(&span.text);
                prev.end = span.end;
                prev.score = (prev.score + span.score) / 2.0;
                prev.label = prev.label.max(span.label);
            }
            _ => merged.push(span),
        }
    }
    merged
}

fn strip_hyphens(span: &mut TypedSpan) {
    let leading = span.text.chars().take_while(|c| *c == '-').count();
    let trimmed = span.text.trim_matches('-');
    let trailing = span.text.chars().count() - leading - trimmed.chars().count();
    span.text = trimmed.to_string();
    span.start += leading;
    span.end = span.end.saturating_sub(trailing).max(span.start);
}

/// Validate, merge and filter raw tagger output.
///
/// Spans with a kind the pipeline does not track are dropped; a malformed
/// entity group fails the whole call.
pub fn postprocess(spans: Vec<NerSpan>) -> Result<Vec<DetectedEntity>, AppError> {
    let typed = spans
        .into_iter()
        .map(validate)
        .collect::<Result<Vec<_>, _>>()?;

    let mut entities = Vec::new();
    for mut span in merge_adjacent(typed) {
        if span.text.chars().count() < MIN_SPAN_CHARS {
            continue;
        }
        strip_hyphens(&mut span);
        if span.text.is_empty() {
            continue;
        }
        let Some(kind) = span.kind else {
            tracing::debug!(surface = %span.text, "Dropping span of untracked kind");
            continue;
        };
        entities.push(DetectedEntity {
            kind,
            surface_form: span.text,
            lemma: None,
            char_start: span.start,
            char_end: span.end,
            score: span.score,
            label: span.label,
        });
    }
    Ok(entities)
}

/// Split detections per kind, in [`EntityKind::ALL`] order.
pub fn split_by_kind(entities: Vec<DetectedEntity>) -> Vec<(EntityKind, Vec<DetectedEntity>)> {
    let mut buckets: Vec<(EntityKind, Vec<DetectedEntity>)> =
        EntityKind::ALL.iter().map(|k| (*k, Vec::new())).collect();
    for entity in entities {
        if let Some((_, bucket)) = buckets.iter_mut().find(|(k, _)| *k == entity.kind) {
            bucket.push(entity);
        }
    }
    buckets
}
