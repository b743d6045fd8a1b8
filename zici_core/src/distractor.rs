//! Distractor generation for multiple-choice questions.
//!
//! Wrong options are ranked by how easily they are confused with the correct
//! reading:
//! 1. Same syllable, different tone
//! 2. Same leading sound
//! 3. Same trailing sound
//! 4. Anything else
//!
//! Tiers are filled in order; the random source only shuffles within a tier.

use crate::{Catalog, Item};
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};

pub const DEFAULT_DISTRACTOR_COUNT: usize = 3;

static TONE_TABLE: Lazy<HashMap<char, char>> = Lazy::new(|| {
    let groups: [(&str, char); 7] = [
        ("āáǎà", 'a'),
        ("ēéěè", 'e'),
        ("īíǐì", 'i'),
        ("ōóǒò", 'o'),
        ("ūúǔù", 'u'),
        ("ǖǘǚǜ", 'ü'),
        ("ńňǹ", 'n'),
    ];
    groups
        .iter()
        .flat_map(|(toned, plain)| toned.chars().map(move |c| (c, *plain)))
        .collect()
});

/// Replace every toned vowel or nasal with its plain form
pub fn strip_tone(reading: &str) -> String {
    reading
        .chars()
        .map(|c| TONE_TABLE.get(&c).copied().unwrap_or(c))
        .collect()
}

/// How close a candidate reading sits to the target, closest first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Similarity {
    SameSyllable = 0,
    SameInitial = 1,
    SameFinal = 2,
    Unrelated = 3,
}

/// Classify `candidate` against `target`
pub fn similarity(target: &str, candidate: &str) -> Similarity {
    let target_plain = strip_tone(target);
    let candidate_plain = strip_tone(candidate);

    if target_plain == candidate_plain {
        return if target != candidate {
            Similarity::SameSyllable
        } else {
            // Identical readings are filtered out before ranking
            Similarity::Unrelated
        };
    }

    let mut target_chars = target_plain.chars();
    let mut candidate_chars = candidate_plain.chars();
    let target_initial = target_chars.next();
    let candidate_initial = candidate_chars.next();

    if target_initial.is_some() && target_initial == candidate_initial {
        return Similarity::SameInitial;
    }

    let target_final = target_chars.as_str();
    if !target_final.is_empty() && target_final == candidate_chars.as_str() {
        return Similarity::SameFinal;
    }

    Similarity::Unrelated
}

/// Pick up to `count` wrong readings for `target` from `pool`
///
/// Never returns the target itself or a duplicate; returns fewer than
/// `count` only when the pool runs out of distinct candidates.
pub fn reading_distractors<S, R>(target: &str, pool: &[S], count: usize, rng: &mut R) -> Vec<String>
where
    S: AsRef<str>,
    R: Rng + ?Sized,
{
    let candidates = pool
        .iter()
        .map(AsRef::as_ref)
        .filter(|reading| !reading.is_empty() && *reading != target)
        .map(|reading| (reading.to_string(), reading.to_string()));

    fill_by_tier(target, candidates, count, rng)
}

/// Pick up to `count` wrong glyphs for `target` from the catalog
///
/// Glyphs sharing the target's exact reading are excluded since they would
/// also answer the prompt correctly.
pub fn glyph_distractors<R>(target: &Item, catalog: &Catalog, count: usize, rng: &mut R) -> Vec<String>
where
    R: Rng + ?Sized,
{
    let candidates = catalog
        .all()
        .iter()
        .filter(|item| item.glyph != target.glyph && item.reading != target.reading)
        .map(|item| (item.glyph.clone(), item.reading.clone()));

    fill_by_tier(&target.reading, candidates, count, rng)
}

/// Shared fill policy: bucket (value, reading) pairs by similarity of the
/// reading, shuffle inside each bucket, take from the closest bucket first.
fn fill_by_tier<I, R>(target_reading: &str, candidates: I, count: usize, rng: &mut R) -> Vec<String>
where
    I: IntoIterator<Item = (String, String)>,
    R: Rng + ?Sized,
{
    let mut seen = HashSet::new();
    let mut tiers: [Vec<String>; 4] = Default::default();

    for (value, reading) in candidates {
        if !seen.insert(value.clone()) {
            continue;
        }
        tiers[similarity(target_reading, &reading) as usize].push(value);
    }

    let mut picked = Vec::with_capacity(count);
    for tier in tiers.iter_mut() {
        let need = count.saturating_sub(picked.len());
        if need == 0 {
            break;
        }
        tier.shuffle(rng);
        picked.extend(tier.drain(..).take(need));
    }

    tracing::trace!(
        "Picked {} distractors for '{}': {:?}",
        picked.len(),
        target_reading,
        picked
    );
    picked
}
