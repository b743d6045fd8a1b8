//! Save sinks: how the engine hands snapshots to a [`UserStore`].
//!
//! Every job carries a full snapshot, so a failed save is repaired by the
//! next successful one. The engine never waits on a save unless it calls
//! [`SaveSink::flush`].

use crate::store::UserStore;
use crate::{ErrorBookEntry, UserBlob};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::Duration;

/// Upper bound on how long `flush` waits for outstanding saves
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// A snapshot to persist
#[derive(Clone, Debug)]
pub enum SaveJob {
    UserBlob { user_id: String, blob: Box<UserBlob> },
    ErrorEntries { user_id: String, entries: Vec<ErrorBookEntry> },
}

impl SaveJob {
    pub fn kind(&self) -> &'static str {
        match self {
            SaveJob::UserBlob { .. } => "user data",
            SaveJob::ErrorEntries { .. } => "error book",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            SaveJob::UserBlob { user_id, .. } | SaveJob::ErrorEntries { user_id, .. } => user_id,
        }
    }

    fn run(&self, store: &dyn UserStore) -> SaveOutcome {
        let result = match self {
            SaveJob::UserBlob { user_id, blob } => store.save_user_blob(user_id, blob),
            SaveJob::ErrorEntries { user_id, entries } => {
                store.save_error_entries(user_id, entries)
            }
        };

        if let Err(e) = &result {
            tracing::warn!("Saving {} for {} failed: {}", self.kind(), self.user_id(), e);
        } else {
            tracing::debug!("Saved {} for {}", self.kind(), self.user_id());
        }

        SaveOutcome {
            kind: self.kind(),
            user_id: self.user_id().to_string(),
            result: result.map_err(|e| e.to_string()),
        }
    }
}

/// What happened to one submitted job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    pub kind: &'static str,
    pub user_id: String,
    pub result: std::result::Result<(), String>,
}

impl SaveOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Save sink trait for persisting engine snapshots
pub trait SaveSink: Send {
    /// Queue a job; must not block on storage
    fn submit(&mut self, job: SaveJob);

    /// Outcomes that completed since the last call
    fn poll(&mut self) -> Vec<SaveOutcome>;

    /// Wait (bounded) for every submitted job, returning their outcomes
    fn flush(&mut self) -> Vec<SaveOutcome>;
}

/// Runs each job immediately on the caller's thread
pub struct InlineSaver {
    store: Box<dyn UserStore>,
    completed: Vec<SaveOutcome>,
}

impl InlineSaver {
    pub fn new(store: Box<dyn UserStore>) -> Self {
        Self {
            store,
            completed: Vec::new(),
        }
    }
}

impl SaveSink for InlineSaver {
    fn submit(&mut self, job: SaveJob) {
        let outcome = job.run(self.store.as_ref());
        self.completed.push(outcome);
    }

    fn poll(&mut self) -> Vec<SaveOutcome> {
        std::mem::take(&mut self.completed)
    }

    fn flush(&mut self) -> Vec<SaveOutcome> {
        self.poll()
    }
}

/// Hands jobs to a worker thread that owns the store
///
/// Jobs run in submission order. If the worker dies, queued and later jobs
/// come back as failed outcomes. Dropping the saver finishes the queue and
/// joins the worker.
pub struct BackgroundSaver {
    jobs: Option<Sender<SaveJob>>,
    outcomes: Receiver<SaveOutcome>,
    /// Kind and user of each submitted job still awaiting an outcome
    pending: VecDeque<(&'static str, String)>,
    /// Failures produced on this side of the channel
    rejected: Vec<SaveOutcome>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundSaver {
    pub fn spawn(store: Box<dyn UserStore>) -> Self {
        let (job_tx, job_rx) = mpsc::channel::<SaveJob>();
        let (outcome_tx, outcome_rx) = mpsc::channel::<SaveOutcome>();

        let worker = std::thread::spawn(move || {
            for job in job_rx {
                let outcome = job.run(store.as_ref());
                if outcome_tx.send(outcome).is_err() {
                    break;
                }
            }
            tracing::debug!("Save worker stopped");
        });

        Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
            pending: VecDeque::new(),
            rejected: Vec::new(),
            worker: Some(worker),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn worker_lost(kind: &'static str, user_id: String) -> SaveOutcome {
        SaveOutcome {
            kind,
            user_id,
            result: Err("save worker is not running".to_string()),
        }
    }

    /// Every job still pending will never report back
    fn fail_pending(&mut self) {
        if !self.pending.is_empty() {
            tracing::error!("Save worker is gone with {} save(s) pending", self.pending.len());
        }
        while let Some((kind, user_id)) = self.pending.pop_front() {
            self.rejected.push(Self::worker_lost(kind, user_id));
        }
    }

    fn received(&mut self, outcome: SaveOutcome, outcomes: &mut Vec<SaveOutcome>) {
        self.pending.pop_front();
        outcomes.push(outcome);
    }
}

impl SaveSink for BackgroundSaver {
    fn submit(&mut self, job: SaveJob) {
        let Some(jobs) = &self.jobs else {
            return;
        };
        let kind = job.kind();
        let user_id = job.user_id().to_string();
        match jobs.send(job) {
            Ok(()) => self.pending.push_back((kind, user_id)),
            Err(mpsc::SendError(_)) => {
                tracing::error!("Save worker is gone; {} save for {} failed", kind, user_id);
                self.rejected.push(Self::worker_lost(kind, user_id));
            }
        }
    }

    fn poll(&mut self) -> Vec<SaveOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.outcomes.try_recv() {
                Ok(outcome) => self.received(outcome, &mut outcomes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.fail_pending();
                    break;
                }
            }
        }
        outcomes.append(&mut self.rejected);
        outcomes
    }

    fn flush(&mut self) -> Vec<SaveOutcome> {
        let mut outcomes = self.poll();
        while !self.pending.is_empty() {
            match self.outcomes.recv_timeout(FLUSH_TIMEOUT) {
                Ok(outcome) => self.received(outcome, &mut outcomes),
                Err(RecvTimeoutError::Timeout) => {
                    tracing::warn!("Gave up waiting on {} pending save(s)", self.pending.len());
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.fail_pending();
                    break;
                }
            }
        }
        outcomes.append(&mut self.rejected);
        outcomes
    }
}

impl Drop for BackgroundSaver {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Save worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::Result;

    /// Store whose saves panic, taking the worker thread down
    struct PanickingStore;

    impl UserStore for PanickingStore {
        fn load_user_blob(&self, _: &str) -> Result<Option<UserBlob>> {
            Ok(None)
        }
        fn save_user_blob(&self, _: &str, _: &UserBlob) -> Result<()> {
            panic!("disk controller on fire");
        }
        fn load_error_entries(&self, _: &str) -> Result<Vec<ErrorBookEntry>> {
            Ok(Vec::new())
        }
        fn save_error_entries(&self, _: &str, _: &[ErrorBookEntry]) -> Result<()> {
            panic!("disk controller on fire");
        }
        fn delete_user(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        fn list_users(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn blob_job(user_id: &str, favorite: &str) -> SaveJob {
        let mut blob = UserBlob::default();
        blob.favorites.push(favorite.to_string());
        SaveJob::UserBlob {
            user_id: user_id.to_string(),
            blob: Box::new(blob),
        }
    }

    #[test]
    fn test_inline_saver_reports_outcomes() {
        let store = MemoryStore::new();
        let mut saver = InlineSaver::new(Box::new(store.clone()));

        saver.submit(blob_job("amy_01", "一"));
        let outcomes = saver.poll();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[0].kind, "user data");
        assert!(saver.poll().is_empty());
        assert!(store.load_user_blob("amy_01").unwrap().is_some());
    }

    #[test]
    fn test_background_saver_keeps_order() {
        let store = MemoryStore::new();
        let mut saver = BackgroundSaver::spawn(Box::new(store.clone()));

        for glyph in ["一", "二", "三"] {
            saver.submit(blob_job("amy_01", glyph));
        }
        let outcomes = saver.flush();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(SaveOutcome::is_ok));
        assert_eq!(saver.in_flight(), 0);

        // Last submitted snapshot wins
        let blob = store.load_user_blob("amy_01").unwrap().unwrap();
        assert_eq!(blob.favorites, vec!["三"]);
    }

    #[test]
    fn test_background_saver_reports_failures() {
        let store = MemoryStore::new();
        store.set_failing(true);
        let mut saver = BackgroundSaver::spawn(Box::new(store.clone()));

        saver.submit(SaveJob::ErrorEntries {
            user_id: "amy_01".into(),
            entries: Vec::new(),
        });
        let outcomes = saver.flush();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_ok());

        store.set_failing(false);
        saver.submit(blob_job("amy_01", "一"));
        assert!(saver.flush()[0].is_ok());
    }

    #[test]
    fn test_drop_finishes_queue() {
        let store = MemoryStore::new();
        {
            let mut saver = BackgroundSaver::spawn(Box::new(store.clone()));
            saver.submit(blob_job("amy_01", "一"));
        }
        assert!(store.load_user_blob("amy_01").unwrap().is_some());
    }

    #[test]
    fn test_dead_worker_reports_failed_saves() {
        let mut saver = BackgroundSaver::spawn(Box::new(PanickingStore));

        saver.submit(blob_job("amy_01", "一"));
        let outcomes = saver.flush();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind, "user data");
        assert!(!outcomes[0].is_ok());
        assert_eq!(saver.in_flight(), 0);

        // Later jobs cannot reach the worker and fail on submit
        saver.submit(SaveJob::ErrorEntries {
            user_id: "amy_01".into(),
            entries: Vec::new(),
        });
        let outcomes = saver.poll();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].kind, "error book");
        assert!(!outcomes[0].is_ok());
        assert!(saver.poll().is_empty());
    }
}
