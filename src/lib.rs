//! # MeridianKV
//!
//! A durable, networked key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Periodic atomic snapshots with WAL-wins crash recovery
//! - Single-writer/multi-reader concurrency model
//! - Line-delimited JSON protocol over TCP
//! - Two replication modes: primary/secondary with election, and
//!   leaderless last-writer-wins
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │                  (Multiple Clients)                          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    KvService                                 │
//! │       (reads → engine, writes → mode write path)             │
//! └──────┬──────────────────────────────────┬───────────────────┘
//!        │                                  │
//!        ▼                                  ▼
//! ┌─────────────┐                   ┌───────────────────┐
//! │ StateEngine │◄──────────────────│   Controller      │
//! │ WAL + map + │   apply entries   │ (cluster / LWW)   │
//! │  snapshots  │                   └─────────┬─────────┘
//! └─────────────┘                             │
//!                                             ▼
//!                                   ┌───────────────────┐
//!                                   │  Peer transport   │
//!                                   │  (repl port)      │
//!                                   └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod snapshot;
pub mod store;
pub mod engine;
pub mod index;
pub mod protocol;
pub mod network;
pub mod repl;
pub mod cluster;
pub mod leaderless;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{MeridianError, Result};
pub use config::Config;
pub use engine::StateEngine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of MeridianKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
