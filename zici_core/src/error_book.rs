//! Error ledger: items the learner has missed, kept for error-focused replay.
//!
//! Entries live independently of learning records. They are created on the
//! first miss, refreshed on every later miss, and only removed on request.

use crate::{Catalog, ErrorBookEntry, ErrorSource, Item};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ErrorLedger {
    entries: HashMap<String, ErrorBookEntry>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the ledger with persisted entries
    ///
    /// Entries whose glyph is not in the catalog are dropped. Returns the
    /// number dropped.
    pub fn hydrate(&mut self, entries: Vec<ErrorBookEntry>, catalog: &Catalog) -> usize {
        self.entries.clear();
        let mut skipped = 0;
        for entry in entries {
            if catalog.by_glyph(&entry.glyph).is_none() {
                tracing::debug!("Skipping error entry for unknown glyph '{}'", entry.glyph);
                skipped += 1;
                continue;
            }
            self.entries.insert(entry.glyph.clone(), entry);
        }
        tracing::debug!(
            "Hydrated {} error book entries ({} skipped)",
            self.entries.len(),
            skipped
        );
        skipped
    }

    /// Record a miss for `item`
    pub fn record_error(
        &mut self,
        item: &Item,
        source: ErrorSource,
        now: DateTime<Utc>,
    ) -> &ErrorBookEntry {
        let entry = self
            .entries
            .entry(item.glyph.clone())
            .and_modify(|existing| {
                existing.error_count += 1;
                existing.last_error_at = now;
                existing.source = source;
            })
            .or_insert_with(|| ErrorBookEntry {
                id: Uuid::new_v4().to_string(),
                glyph: item.glyph.clone(),
                reading: item.reading.clone(),
                meaning: item.meaning_hint().to_string(),
                added_at: now,
                error_count: 1,
                last_error_at: now,
                source,
            });

        tracing::debug!(
            "Error book: '{}' missed {} time(s), source {:?}",
            entry.glyph,
            entry.error_count,
            entry.source
        );
        entry
    }

    /// Remove an entry; returns it if it existed
    pub fn remove(&mut self, glyph: &str) -> Option<ErrorBookEntry> {
        let removed = self.entries.remove(glyph);
        if removed.is_some() {
            tracing::info!("Removed '{}' from the error book", glyph);
        }
        removed
    }

    /// Items to replay, most recently missed first
    ///
    /// Entries whose glyph no longer resolves in the catalog are skipped.
    pub fn list_for_review(&self, catalog: &Catalog) -> Vec<Item> {
        self.entries()
            .into_iter()
            .filter_map(|entry| match catalog.by_glyph(&entry.glyph) {
                Some(item) => Some(item.clone()),
                None => {
                    tracing::debug!("Error book glyph '{}' not in catalog", entry.glyph);
                    None
                }
            })
            .collect()
    }

    /// All entries, most recently missed first (ties by glyph)
    pub fn entries(&self) -> Vec<&ErrorBookEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            b.last_error_at
                .cmp(&a.last_error_at)
                .then_with(|| a.glyph.cmp(&b.glyph))
        });
        entries
    }

    /// Owned snapshot for persistence
    pub fn snapshot(&self) -> Vec<ErrorBookEntry> {
        self.entries().into_iter().cloned().collect()
    }

    pub fn get(&self, glyph: &str) -> Option<&ErrorBookEntry> {
        self.entries.get(glyph)
    }

    pub fn contains(&self, glyph: &str) -> bool {
        self.entries.contains_key(glyph)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
