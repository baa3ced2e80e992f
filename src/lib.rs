//! # Issue Synchronization Engine
//!
//! Core engine for mirroring issue-tracker records (issues, comments,
//! labels, attachments, time tracking) between projects on two instances of
//! a source-control platform. The engine discovers changed issues on the
//! source, maps them onto the target, prevents bidirectional mirrors from
//! looping, and runs everything under retry, rate-limit, circuit-breaker,
//! and checkpoint discipline so that a crash or a remote outage never
//! corrupts state or duplicates work.
//!
//! The surrounding product (web UI, persistence) plugs in via
//! [`store::RecordStore`] and drives the engine through
//! [`scheduler::SyncScheduler`] and [`api::SyncService`].

pub mod api;
pub mod attachments;
pub mod client;
pub mod config;
pub mod error;
pub mod hash;
pub mod logging;
pub mod mapper;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod remote;
pub mod resilience;
pub mod scheduler;
pub mod store;

pub use api::{SyncService, SyncStatusView};
pub use client::ResilientClient;
pub use config::{AppConfig, ConfigLoader};
pub use error::{RemoteError, SyncError};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use scheduler::SyncScheduler;
