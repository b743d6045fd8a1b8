#![forbid(unsafe_code)]

//! Core domain model and business logic for the Zici character trainer.
//!
//! This crate provides:
//! - Domain types (items, learning records, quiz questions, settings)
//! - Item catalog loading and lookup
//! - Distractor generation and question building
//! - Mastery tracking, the error book and learner statistics
//! - The session engine with its diagnostic track
//! - Persistence (file store, two-tier cache, background saver)

pub mod types;
pub mod error;
pub mod catalog;
pub mod config;
pub mod logging;
pub mod distractor;
pub mod mastery;
pub mod error_book;
pub mod quiz;
pub mod stats;
pub mod store;
pub mod saver;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::Catalog;
pub use config::Config;
pub use engine::{Engine, EngineEvent, EngineOptions, PersistenceStatus};
pub use error_book::ErrorLedger;
pub use mastery::MasteryTracker;
pub use saver::{BackgroundSaver, InlineSaver, SaveSink};
pub use store::{FileStore, MemoryStore, TieredStore, UserProfile, UserStore};
