//! Loader for the per-kind synonym alias tables.
//!
//! One row per canonical keyword: the keyword id in the first column,
//! aliases in the rest. Rows are ragged. Bookkeeping columns left over from
//! the labelling sheets are ignored by header name.

use std::io;
use std::path::Path;

use crate::entity::EntityKind;
use crate::error::AppError;

const IGNORED_COLUMNS: &[&str] = &[
    "rész típus",
    "detected_ent",
    "no_detections",
    "no_db_keywords",
    "number_of_missed_detections",
    "címkézési szabály",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymEntry {
    pub keyword_id: i64,
    pub aliases: Vec<String>,
}

/// Parse a synonym table. Rows without a numeric id are skipped.
pub fn read_synonyms<R: io::Read>(reader: R) -> Result<Vec<SynonymEntry>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let ignored: Vec<usize> = rdr
        .headers()?
        .iter()
        .enumerate()
        .filter(|(_, h)| IGNORED_COLUMNS.contains(&h.trim()))
        .map(|(i, _)| i)
        .collect();

    let mut entries = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let Some(raw_id) = record.get(0).map(str::trim) else {
            continue;
        };
        let Ok(keyword_id) = raw_id.parse::<i64>() else {
            tracing::debug!(row = line + 2, id = %raw_id, "Skipping synonym row without keyword id");
            continue;
        };
        let aliases: Vec<String> = record
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(i, _)| !ignored.contains(i))
            .map(|(_, alias)| alias.trim())
            .filter(|alias| !alias.is_empty())
            .map(str::to_string)
            .collect();
        if !aliases.is_empty() {
            entries.push(SynonymEntry {
                keyword_id,
                aliases,
            });
        }
    }
    Ok(entries)
}

/// Load `<dir>/<kind>_synonym.csv`.
///
/// Kinds without a synonym table, and a missing file, yield an empty table.
pub fn load_for_kind(dir: &Path, kind: EntityKind) -> Result<Vec<SynonymEntry>, AppError> {
    let Some(file_name) = kind.synonym_file_name() else {
        return Ok(Vec::new());
    };
    let path = dir.join(file_name);
    match std::fs::File::open(&path) {
        Ok(file) => {
            let entries = read_synonyms(file)?;
            tracing::info!(%kind, path = %path.display(), rows = entries.len(), "Loaded synonym table");
            Ok(entries)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::warn!(%kind, path = %path.display(), "Synonym table not found, continuing without aliases");
            Ok(Vec::new())
        }
        Err(e) => Err(AppError::ConfigError(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}
