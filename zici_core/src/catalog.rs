//! Item catalog: every learnable character, loaded once and read-only after.
//!
//! The dataset is a CSV file with rows of
//! `sequence,glyph,reading,word1,word2,word3`. Title rows and rows whose
//! sequence column is not a positive number are skipped.

use crate::{Error, Item, Result};
use csv::ReaderBuilder;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// In-memory collection of items, ordered by sequence number
#[derive(Clone, Debug)]
pub struct Catalog {
    items: Vec<Item>,
    by_glyph: HashMap<String, usize>,
    by_sequence: HashMap<u32, usize>,
}

impl Catalog {
    /// Build a catalog from already-parsed items
    ///
    /// Items are sorted by sequence number. When a glyph appears more than
    /// once, the earliest item owns it for lookups.
    pub fn from_items(mut items: Vec<Item>) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::DataUnavailable(
                "catalog source contains no items".into(),
            ));
        }

        items.sort_by_key(|item| item.sequence);

        let mut by_glyph = HashMap::with_capacity(items.len());
        let mut by_sequence = HashMap::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            by_glyph.entry(item.glyph.clone()).or_insert(idx);
            by_sequence.entry(item.sequence).or_insert(idx);
        }

        Ok(Self {
            items,
            by_glyph,
            by_sequence,
        })
    }

    /// Load the catalog from a CSV file
    pub fn load_csv(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::DataUnavailable(format!("cannot read catalog {:?}: {}", path, e))
        })?;
        let catalog = Self::from_csv_str(&contents)?;
        tracing::info!("Loaded {} items from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Parse catalog rows from CSV text
    pub fn from_csv_str(text: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let mut items = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Skipping unreadable catalog row {}: {}", line + 1, e);
                    continue;
                }
            };

            let Some(sequence) = record.get(0).and_then(parse_sequence) else {
                // Title rows, column headers and blank lines
                continue;
            };

            if record.len() < 3 {
                tracing::warn!(
                    "Skipping catalog row {} (sequence {}): expected at least 3 columns",
                    line + 1,
                    sequence
                );
                continue;
            }

            let glyph = record.get(1).unwrap_or("");
            if glyph.is_empty() {
                tracing::warn!("Skipping catalog row {}: empty glyph", line + 1);
                continue;
            }

            let examples = (3..6)
                .filter_map(|col| record.get(col))
                .map(str::to_string);
            items.push(Item::new(
                sequence,
                glyph,
                record.get(2).unwrap_or(""),
                examples,
            ));
        }

        if items.is_empty() {
            return Err(Error::DataUnavailable(
                "catalog is empty or malformed".into(),
            ));
        }

        Self::from_items(items)
    }

    /// All items in sequence order
    pub fn all(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn by_glyph(&self, glyph: &str) -> Option<&Item> {
        self.by_glyph.get(glyph).map(|&idx| &self.items[idx])
    }

    pub fn by_sequence(&self, sequence: u32) -> Option<&Item> {
        self.by_sequence.get(&sequence).map(|&idx| &self.items[idx])
    }

    /// Items with `lo <= sequence <= hi`, in sequence order
    pub fn by_sequence_range(&self, lo: u32, hi: u32) -> Vec<&Item> {
        self.items
            .iter()
            .filter(|item| item.sequence >= lo && item.sequence <= hi)
            .collect()
    }

    /// Highest sequence number in the catalog
    pub fn last_sequence(&self) -> u32 {
        self.items.last().map(|item| item.sequence).unwrap_or(0)
    }

    /// Distinct non-empty readings in catalog order
    pub fn readings(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .map(|item| item.reading.as_str())
            .filter(|reading| !reading.is_empty() && seen.insert(*reading))
            .collect()
    }

    /// Items whose glyph, reading or example compounds contain `keyword`
    pub fn search(&self, keyword: &str) -> Vec<&Item> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Vec::new();
        }
        self.items
            .iter()
            .filter(|item| {
                item.glyph.contains(keyword)
                    || item.reading.contains(keyword)
                    || item.examples.iter().any(|w| w.contains(keyword))
            })
            .collect()
    }

    /// Check the catalog for data problems
    ///
    /// Returns a list of warnings, or empty Vec if clean. Problems here never
    /// prevent loading; duplicates simply lose lookups to the first item.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (idx, item) in self.items.iter().enumerate() {
            if self.by_glyph.get(&item.glyph) != Some(&idx) {
                warnings.push(format!(
                    "Item {} repeats glyph '{}' already used by an earlier item",
                    item.sequence, item.glyph
                ));
            }
            if self.by_sequence.get(&item.sequence) != Some(&idx) {
                warnings.push(format!("Sequence number {} is used twice", item.sequence));
            }
            if item.reading.is_empty() {
                warnings.push(format!(
                    "Item {} ('{}') has no reading",
                    item.sequence, item.glyph
                ));
            }
        }

        warnings
    }
}

fn parse_sequence(raw: &str) -> Option<u32> {
    let raw = raw.trim().trim_start_matches('\u{feff}');
    if let Ok(n) = raw.parse::<u32>() {
        return (n > 0).then_some(n);
    }
    // Spreadsheet exports sometimes write "12.0"
    raw.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && n.fract() == 0.0 && *n >= 1.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32)
}

/// Small catalog shared by unit tests across modules
#[cfg(test)]
pub(crate) fn sample_catalog() -> Catalog {
    let rows = [
        (1, "的", "de", "的确"),
        (2, "一", "yī", "一个"),
        (3, "是", "shì", "是的"),
        (4, "在", "zài", "现在"),
        (5, "不", "bù", "不要"),
        (6, "了", "le", "了解"),
        (7, "有", "yǒu", "有人"),
        (8, "和", "hé", "和平"),
        (9, "人", "rén", "大人"),
        (10, "这", "zhè", "这个"),
        (11, "十", "shí", "十个"),
        (12, "时", "shí", "时间"),
        (13, "事", "shì", "事情"),
        (14, "使", "shǐ", "使用"),
        (15, "山", "shān", "山水"),
        (16, "字", "zì", "汉字"),
        (17, "子", "zǐ", "孩子"),
        (18, "自", "zì", "自己"),
        (19, "四", "sì", "四个"),
        (20, "词", "cí", "词语"),
    ];
    let items = rows
        .iter()
        .map(|&(seq, glyph, reading, word)| Item::new(seq, glyph, reading, vec![word.to_string()]))
        .collect();
    Catalog::from_items(items).expect("sample catalog is non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
常用字表,,,,,
序号,汉字,拼音,词语1,词语2,词语3
1,字,zì,汉字,字母,
2,子,zǐ,孩子,子女,
3,字,zì,写字,,
x,bad,row,,,
4,山
";

    #[test]
    fn test_csv_skips_title_and_malformed_rows() {
        let catalog = Catalog::from_csv_str(CSV).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.all()[0].examples, vec!["汉字", "字母"]);
        assert_eq!(catalog.all()[1].glyph, "子");
    }

    #[test]
    fn test_sequence_must_be_whole() {
        assert_eq!(parse_sequence("12"), Some(12));
        assert_eq!(parse_sequence("12.0"), Some(12));
        assert_eq!(parse_sequence("12.5"), None);
        assert_eq!(parse_sequence("0"), None);
        assert_eq!(parse_sequence("1e12"), None);

        let catalog = Catalog::from_csv_str("1,的,de,的确\n2.5,一,yī,一个\n3,是,shì,是的\n").unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(catalog.by_glyph("一").is_none());
    }

    #[test]
    fn test_duplicate_glyph_resolves_to_first() {
        let catalog = Catalog::from_csv_str(CSV).unwrap();
        assert_eq!(catalog.by_glyph("字").unwrap().sequence, 1);
        let warnings = catalog.validate();
        assert_eq!(warnings.len(), 1, "{:?}", warnings);
        assert!(warnings[0].contains("repeats glyph"));
    }

    #[test]
    fn test_empty_source_is_data_unavailable() {
        let err = Catalog::from_csv_str("序号,汉字,拼音\n").unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));

        let err = Catalog::from_items(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));
    }

    #[test]
    fn test_missing_file_is_data_unavailable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = Catalog::load_csv(&temp_dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));
    }

    #[test]
    fn test_sequence_range_is_inclusive() {
        let catalog = sample_catalog();
        let seqs: Vec<u32> = catalog
            .by_sequence_range(3, 6)
            .iter()
            .map(|i| i.sequence)
            .collect();
        assert_eq!(seqs, vec![3, 4, 5, 6]);
        assert!(catalog.by_sequence_range(30, 40).is_empty());
    }

    #[test]
    fn test_readings_are_distinct() {
        let catalog = sample_catalog();
        let readings = catalog.readings();
        assert_eq!(readings.iter().filter(|r| **r == "shí").count(), 1);
        assert_eq!(readings.iter().filter(|r| **r == "zì").count(), 1);
    }

    #[test]
    fn test_search_matches_compounds() {
        let catalog = sample_catalog();
        let hits = catalog.search("孩子");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].glyph, "子");
        assert!(catalog.search("  ").is_empty());
    }

    #[test]
    fn test_sample_catalog_validates() {
        let catalog = sample_catalog();
        assert!(catalog.validate().is_empty());
        assert_eq!(catalog.last_sequence(), 20);
    }
}
