//! Email classification and entity-resolution pipeline.
//!
//! Per email the flow is:
//! 1. `matcher` — deterministic LP/deal resolution against known candidates
//! 2. `orchestrator` — AI classification with deterministic fallback
//! 3. idempotent upsert of exactly one ParsedEmail row per raw email
//!
//! `bulk` drives backfills and reparse-all runs through `batch`;
//! `answered` runs after each ingestion batch, independently of parsing.

pub mod answered;
pub mod batch;
pub mod bulk;
pub mod matcher;
pub mod orchestrator;
pub mod simple;

pub use answered::AnsweredQuestionDetector;
pub use batch::{BatchError, BatchItem, BatchOutcome, process_in_batches};
pub use bulk::{BackfillSummary, ReparseSummary, backfill_deal, reparse_all};
pub use orchestrator::{EmailParser, ParseContext};
pub use simple::SimpleParser;
