//! User data persistence with file locking.
//!
//! Each learner owns two JSON documents: the user blob (records, stats,
//! settings, favorites) and the error book. Stores implement [`UserStore`];
//! [`TieredStore`] layers an authoritative store over a local cache.

use crate::{ErrorBookEntry, Error, Result, UserBlob};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

const ERRORBOOK_SUFFIX: &str = "_errorbook";

/// Load/save/delete of per-user documents
pub trait UserStore: Send {
    fn load_user_blob(&self, user_id: &str) -> Result<Option<UserBlob>>;
    fn save_user_blob(&self, user_id: &str, blob: &UserBlob) -> Result<()>;
    fn load_error_entries(&self, user_id: &str) -> Result<Vec<ErrorBookEntry>>;
    fn save_error_entries(&self, user_id: &str, entries: &[ErrorBookEntry]) -> Result<()>;
    /// Remove both documents; true if anything existed
    fn delete_user(&self, user_id: &str) -> Result<bool>;
    fn list_users(&self) -> Result<Vec<String>>;
}

// ============================================================================
// User identity
// ============================================================================

/// Learner identity used to derive the storage id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub student_id: String,
}

impl UserProfile {
    pub fn new(name: impl Into<String>, student_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            student_id: student_id.into(),
        }
    }

    /// `<name>_<student id>`, safe to use as a file stem
    pub fn user_id(&self) -> String {
        let name: String = self
            .name
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-");
        sanitize_user_id(&format!("{}_{}", name, self.student_id.trim()))
    }
}

/// Replace anything that could escape the store directory
pub fn sanitize_user_id(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "guest".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// File store
// ============================================================================

/// JSON files in one directory: `<id>.json` and `<id>_errorbook.json`
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn blob_path(&self, user_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_user_id(user_id)))
    }

    pub fn errorbook_path(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}{}.json",
            sanitize_user_id(user_id),
            ERRORBOOK_SUFFIX
        ))
    }
}

impl UserStore for FileStore {
    fn load_user_blob(&self, user_id: &str) -> Result<Option<UserBlob>> {
        read_json(&self.blob_path(user_id))
    }

    fn save_user_blob(&self, user_id: &str, blob: &UserBlob) -> Result<()> {
        write_json(&self.blob_path(user_id), blob)
    }

    fn load_error_entries(&self, user_id: &str) -> Result<Vec<ErrorBookEntry>> {
        Ok(read_json(&self.errorbook_path(user_id))?.unwrap_or_default())
    }

    fn save_error_entries(&self, user_id: &str, entries: &[ErrorBookEntry]) -> Result<()> {
        write_json(&self.errorbook_path(user_id), &entries)
    }

    fn delete_user(&self, user_id: &str) -> Result<bool> {
        let mut existed = false;
        for path in [self.blob_path(user_id), self.errorbook_path(user_id)] {
            match std::fs::remove_file(&path) {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if existed {
            tracing::info!("Deleted user data for {}", user_id);
        }
        Ok(existed)
    }

    fn list_users(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut users: Vec<String> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let stem = name.strip_suffix(".json")?;
                (!stem.ends_with(ERRORBOOK_SUFFIX)).then(|| stem.to_string())
            })
            .collect();
        users.sort();
        Ok(users)
    }
}

/// Read a JSON document under a shared lock
///
/// Missing files read as None. Unparseable files are logged and also read
/// as None so a corrupt document never blocks a session.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        tracing::debug!("No document at {:?}", path);
        return Ok(None);
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let mut contents = String::new();
    let mut reader = std::io::BufReader::new(&file);
    if let Err(e) = reader.read_to_string(&mut contents) {
        let _ = file.unlock();
        return Err(e.into());
    }
    file.unlock()?;

    match serde_json::from_str::<T>(&contents) {
        Ok(value) => {
            tracing::debug!("Loaded {:?}", path);
            Ok(Some(value))
        }
        Err(e) => {
            tracing::warn!("Failed to parse {:?}: {}. Ignoring it.", path, e);
            Ok(None)
        }
    }
}

/// Write a JSON document atomically
///
/// Writes to a temp file in the same directory under an exclusive lock,
/// syncs, then renames over the target.
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "document path missing parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        serde_json::to_writer(&mut writer, value)?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;
    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Saved {:?}", path);
    Ok(())
}

// ============================================================================
// Two-tier store
// ============================================================================

/// Authoritative store with a local fallback cache
///
/// Loads try the primary first and fall back to the cache when the primary
/// fails or has nothing. Saves always write the cache; a primary failure is
/// reported as `PersistenceFailure` after the cache write.
pub struct TieredStore {
    primary: Box<dyn UserStore>,
    cache: Box<dyn UserStore>,
}

impl TieredStore {
    pub fn new(primary: Box<dyn UserStore>, cache: Box<dyn UserStore>) -> Self {
        Self { primary, cache }
    }

    fn save_both<F>(&self, what: &str, user_id: &str, save: F) -> Result<()>
    where
        F: Fn(&dyn UserStore) -> Result<()>,
    {
        if let Err(e) = save(self.cache.as_ref()) {
            tracing::warn!("Local cache save of {} for {} failed: {}", what, user_id, e);
        }

        save(self.primary.as_ref()).map_err(|e| {
            Error::PersistenceFailure(format!(
                "saving {} for {} failed ({}); kept in local cache",
                what, user_id, e
            ))
        })
    }
}

impl UserStore for TieredStore {
    fn load_user_blob(&self, user_id: &str) -> Result<Option<UserBlob>> {
        match self.primary.load_user_blob(user_id) {
            Ok(Some(blob)) => {
                if let Err(e) = self.cache.save_user_blob(user_id, &blob) {
                    tracing::debug!("Could not refresh local cache for {}: {}", user_id, e);
                }
                Ok(Some(blob))
            }
            Ok(None) => self.cache.load_user_blob(user_id),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    "Primary store unavailable for {} ({}), using local cache",
                    user_id,
                    e
                );
                self.cache.load_user_blob(user_id)
            }
            Err(e) => Err(e),
        }
    }

    fn save_user_blob(&self, user_id: &str, blob: &UserBlob) -> Result<()> {
        self.save_both("user data", user_id, |store| {
            store.save_user_blob(user_id, blob)
        })
    }

    fn load_error_entries(&self, user_id: &str) -> Result<Vec<ErrorBookEntry>> {
        match self.primary.load_error_entries(user_id) {
            Ok(entries) if !entries.is_empty() => Ok(entries),
            Ok(_) => self.cache.load_error_entries(user_id),
            Err(e) if e.is_recoverable() => {
                tracing::warn!(
                    "Primary store unavailable for {} error book ({}), using local cache",
                    user_id,
                    e
                );
                self.cache.load_error_entries(user_id)
            }
            Err(e) => Err(e),
        }
    }

    fn save_error_entries(&self, user_id: &str, entries: &[ErrorBookEntry]) -> Result<()> {
        self.save_both("error book", user_id, |store| {
            store.save_error_entries(user_id, entries)
        })
    }

    fn delete_user(&self, user_id: &str) -> Result<bool> {
        let cached = self.cache.delete_user(user_id).unwrap_or_else(|e| {
            tracing::warn!("Could not clear local cache for {}: {}", user_id, e);
            false
        });
        Ok(self.primary.delete_user(user_id)? || cached)
    }

    fn list_users(&self) -> Result<Vec<String>> {
        self.primary.list_users().or_else(|e| {
            tracing::warn!("Primary store unavailable ({}), listing cached users", e);
            self.cache.list_users()
        })
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    blobs: HashMap<String, UserBlob>,
    errors: HashMap<String, Vec<ErrorBookEntry>>,
}

/// Store kept entirely in memory; clones share the same data
///
/// `set_failing(true)` makes every save and load fail, which is how the
/// degraded-mode paths are exercised.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    failing: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::PersistenceFailure("memory store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::PersistenceFailure("memory store lock poisoned".into()))
    }
}

impl UserStore for MemoryStore {
    fn load_user_blob(&self, user_id: &str) -> Result<Option<UserBlob>> {
        self.check()?;
        Ok(self.lock()?.blobs.get(user_id).cloned())
    }

    fn save_user_blob(&self, user_id: &str, blob: &UserBlob) -> Result<()> {
        self.check()?;
        self.lock()?.blobs.insert(user_id.to_string(), blob.clone());
        Ok(())
    }

    fn load_error_entries(&self, user_id: &str) -> Result<Vec<ErrorBookEntry>> {
        self.check()?;
        Ok(self.lock()?.errors.get(user_id).cloned().unwrap_or_default())
    }

    fn save_error_entries(&self, user_id: &str, entries: &[ErrorBookEntry]) -> Result<()> {
        self.check()?;
        self.lock()?
            .errors
            .insert(user_id.to_string(), entries.to_vec());
        Ok(())
    }

    fn delete_user(&self, user_id: &str) -> Result<bool> {
        self.check()?;
        let mut inner = self.lock()?;
        let blob = inner.blobs.remove(user_id).is_some();
        let errors = inner.errors.remove(user_id).is_some();
        Ok(blob || errors)
    }

    fn list_users(&self) -> Result<Vec<String>> {
        self.check()?;
        let mut users: Vec<String> = self.lock()?.blobs.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorSource, LearningRecord, Mastery};
    use chrono::Utc;

    fn sample_blob() -> UserBlob {
        let mut record = LearningRecord::new("字", "zì");
        record.study_count = 2;
        record.test_count = 10;
        record.correct_count = 9;
        record.streak = 3;
        record.mastery = Mastery::Mastered;

        let mut blob = UserBlob::default();
        blob.learning_records.insert("字".into(), record);
        blob.favorites = vec!["山".into()];
        blob
    }

    fn sample_entry() -> ErrorBookEntry {
        ErrorBookEntry {
            id: "e1".into(),
            glyph: "山".into(),
            reading: "shān".into(),
            meaning: "山水".into(),
            added_at: Utc::now(),
            error_count: 2,
            last_error_at: Utc::now(),
            source: ErrorSource::Diagnostic,
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());

        let blob = sample_blob();
        store.save_user_blob("amy_01", &blob).unwrap();
        store.save_error_entries("amy_01", &[sample_entry()]).unwrap();

        let loaded = store.load_user_blob("amy_01").unwrap().unwrap();
        assert_eq!(loaded, blob);
        let record = &loaded.learning_records["字"];
        assert_eq!(record.test_count, 10);
        assert_eq!(record.mastery, Mastery::Mastered);

        let entries = store.load_error_entries("amy_01").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_count, 2);
    }

    #[test]
    fn test_missing_documents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path().join("users"));

        assert!(store.load_user_blob("nobody").unwrap().is_none());
        assert!(store.load_error_entries("nobody").unwrap().is_empty());
        assert!(store.list_users().unwrap().is_empty());
        assert!(!store.delete_user("nobody").unwrap());
    }

    #[test]
    fn test_corrupted_blob_reads_as_absent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        std::fs::write(store.blob_path("amy_01"), "{ invalid json }").unwrap();

        assert!(store.load_user_blob("amy_01").unwrap().is_none());
    }

    #[test]
    fn test_partial_blob_merges_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        std::fs::write(
            store.blob_path("amy_01"),
            r#"{"settings":{"learn_count":25},"favorites":["一"]}"#,
        )
        .unwrap();

        let blob = store.load_user_blob("amy_01").unwrap().unwrap();
        assert_eq!(blob.settings.learn_count, 25);
        assert_eq!(blob.settings.countdown_secs, 30);
        assert_eq!(blob.review_settings.review_count, 15);
        assert_eq!(blob.favorites, vec!["一"]);
    }

    #[test]
    fn test_list_and_delete_users() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        store.save_user_blob("bo_02", &UserBlob::default()).unwrap();
        store.save_user_blob("amy_01", &UserBlob::default()).unwrap();
        store.save_error_entries("amy_01", &[sample_entry()]).unwrap();

        assert_eq!(store.list_users().unwrap(), vec!["amy_01", "bo_02"]);
        assert!(store.delete_user("amy_01").unwrap());
        assert_eq!(store.list_users().unwrap(), vec!["bo_02"]);
        assert!(!store.errorbook_path("amy_01").exists());
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(temp_dir.path());
        store.save_user_blob("amy_01", &sample_blob()).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "amy_01.json")
            .collect();
        assert!(extras.is_empty(), "Found extras: {:?}", extras);
    }

    #[test]
    fn test_user_profile_id() {
        assert_eq!(UserProfile::new("Amy Li", "007").user_id(), "amy-li_007");
        assert_eq!(UserProfile::new("王小明", "12").user_id(), "王小明_12");
        assert_eq!(sanitize_user_id("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize_user_id("  "), "guest");
    }

    #[test]
    fn test_tiered_store_falls_back_to_cache() {
        let primary = MemoryStore::new();
        let cache = MemoryStore::new();
        let tiered = TieredStore::new(Box::new(primary.clone()), Box::new(cache.clone()));

        tiered.save_user_blob("amy_01", &sample_blob()).unwrap();
        assert!(primary.load_user_blob("amy_01").unwrap().is_some());
        assert!(cache.load_user_blob("amy_01").unwrap().is_some());

        primary.set_failing(true);
        let err = tiered
            .save_error_entries("amy_01", &[sample_entry()])
            .unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure(_)));
        // The cache still took the write
        assert_eq!(cache.load_error_entries("amy_01").unwrap().len(), 1);

        // Reads keep working through the cache
        assert!(tiered.load_user_blob("amy_01").unwrap().is_some());
        assert_eq!(tiered.load_error_entries("amy_01").unwrap().len(), 1);
    }

    #[test]
    fn test_tiered_store_prefers_primary() {
        let primary = MemoryStore::new();
        let cache = MemoryStore::new();
        let mut newer = sample_blob();
        newer.favorites = vec!["一".into(), "二".into()];
        primary.save_user_blob("amy_01", &newer).unwrap();
        cache.save_user_blob("amy_01", &sample_blob()).unwrap();

        let tiered = TieredStore::new(Box::new(primary), Box::new(cache.clone()));
        let loaded = tiered.load_user_blob("amy_01").unwrap().unwrap();
        assert_eq!(loaded.favorites.len(), 2);
        // Cache refreshed opportunistically
        assert_eq!(cache.load_user_blob("amy_01").unwrap().unwrap().favorites.len(), 2);
    }
}
