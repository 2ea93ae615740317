//! Near-duplicate detection for relevant articles.
//!
//! Two outlets often cover the same story on the same day. Each relevant
//! article gets a MinHash signature over its word set; an article whose
//! estimated Jaccard similarity to a recent article from another outlet
//! reaches [`SIMILARITY_THRESHOLD`] joins that article's group.

use std::collections::BTreeSet;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const SIMILARITY_THRESHOLD: f64 = 0.3;

/// How far back a new article is compared against.
pub const SIMILARITY_WINDOW: TimeDelta = TimeDelta::hours(24);

pub const NUM_PERM: usize = 128;

const MERSENNE_PRIME: u64 = (1 << 61) - 1;

/// Words too common to say anything about the story.
const STOPWORDS: &[&str] = &[
    "aki", "akik", "akkor", "alatt", "által", "amely", "amelyek", "ami", "amit", "amikor",
    "arra", "azok", "azonban", "azt", "azért", "csak", "egy", "egyik", "ebben", "ennek",
    "ezt", "ezért", "hanem", "hogy", "illetve", "így", "között", "kell", "lesz", "lett",
    "már", "meg", "mert", "még", "mint", "minden", "most", "nem", "nincs", "pedig",
    "sem", "szerint", "után", "valamint", "van", "vagy", "volt", "voltak",
];

/// Lowercased words longer than two characters, minus stopwords.
pub fn shingles(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Fixed-length MinHash signature. Slots are below 2^61, so they fit the
/// `BIGINT[]` column unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinHash(Vec<u64>);

impl MinHash {
    /// `None` when the text has no usable words.
    pub fn from_text(text: &str) -> Option<Self> {
        let shingles = shingles(text);
        if shingles.is_empty() {
            return None;
        }

        let permutations = permutations();
        let mut slots = vec![MERSENNE_PRIME; NUM_PERM];
        for shingle in &shingles {
            let h = fnv1a(shingle.as_bytes()) % MERSENNE_PRIME;
            for (slot, &(a, b)) in slots.iter_mut().zip(&permutations) {
                let v = ((a as u128 * h as u128 + b as u128) % MERSENNE_PRIME as u128) as u64;
                if v < *slot {
                    *slot = v;
                }
            }
        }
        Some(Self(slots))
    }

    /// Estimated Jaccard similarity: the share of equal slots.
    pub fn jaccard(&self, other: &MinHash) -> f64 {
        let equal = self.0.iter().zip(&other.0).filter(|(a, b)| a == b).count();
        equal as f64 / NUM_PERM as f64
    }

    pub fn to_db(&self) -> Vec<i64> {
        self.0.iter().map(|&v| v as i64).collect()
    }

    pub fn from_db(values: Vec<i64>) -> Result<Self, AppError> {
        if values.len() != NUM_PERM || values.iter().any(|&v| v < 0) {
            return Err(AppError::DatabaseError(format!(
                "minhash must have {NUM_PERM} non-negative slots, got {}",
                values.len()
            )));
        }
        Ok(Self(values.into_iter().map(|v| v as u64).collect()))
    }
}

/// 64-bit FNV-1a. Signatures are stored, so the shingle hash must not
/// change between builds.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |h, &b| {
        (h ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// `(a, b)` pairs of the universal hash family `(a*x + b) mod p`, drawn
/// from a fixed splitmix64 sequence.
fn permutations() -> Vec<(u64, u64)> {
    let mut state: u64 = 0x853c_49e6_748f_ea9b;
    let mut next = || {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    };
    (0..NUM_PERM)
        .map(|_| (next() % (MERSENNE_PRIME - 1) + 1, next() % MERSENNE_PRIME))
        .collect()
}

/// A recent relevant article with a stored signature.
#[derive(Debug, Clone)]
pub struct IndexedArticle {
    pub article_id: i64,
    pub domain: String,
    pub signature: MinHash,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarArticle {
    pub article_id: i64,
    pub similarity: f64,
}

/// Most similar candidate from another outlet at or above the threshold.
/// Ties go to the older article.
pub fn best_match(
    signature: &MinHash,
    domain: &str,
    article_id: i64,
    candidates: &[IndexedArticle],
) -> Option<SimilarArticle> {
    candidates
        .iter()
        .filter(|c| c.article_id != article_id)
        .filter(|c| domain.is_empty() || c.domain != domain)
        .map(|c| SimilarArticle {
            article_id: c.article_id,
            similarity: signature.jaccard(&c.signature),
        })
        .filter(|s| s.similarity >= SIMILARITY_THRESHOLD)
        .min_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.article_id.cmp(&b.article_id))
        })
}
