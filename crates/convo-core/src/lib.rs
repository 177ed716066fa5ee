//! convo-core library.
//!
//! Finds and merges duplicate CRM conversations that belong to the same
//! customer identity on the same channel.
//!
//! - [`normalize`] canonicalizes phone numbers and channel identities
//! - [`matcher`] buckets records by `(channel, identity key)`
//! - [`planner`] computes the merge for one duplicate group
//! - [`runner`] drives a whole migration run against a [`store::ConversationStore`]
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums in the domain modules, each mapping to
//!   an [`error::ErrorCode`]; `anyhow::Result` at config and database setup.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod config;
pub mod db;
pub mod error;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod planner;
pub mod runner;
pub mod store;

pub use matcher::{DuplicateMatcher, MatchOutcome, UnmatchedRecord, find_duplicate_groups};
pub use normalize::{NormalizationError, NormalizedPhone, normalize, phones_equivalent};
pub use planner::{MergePlan, PlanError, plan};
pub use runner::{MigrationError, MigrationReport, MigrationRunner, RunOptions, RunnerSettings};
