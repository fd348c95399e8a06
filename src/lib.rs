//! # stratakv
//!
//! An embeddable key-value storage engine keyed by 64-bit integers, with:
//! - Pluggable merge semantics for concurrent writes (combinators)
//! - A partitioned append-log file format with background self-compaction
//! - Approximate and exact size queries, full scans
//! - Crash-recoverable metadata snapshots
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Store (facade)                          │
//! │          read / write / iterate / flush / close              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Partition Map                             │
//! │        (key-range routing, per-partition locking)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Segments   │◄─────────│  Compactor  │
//!   │ (append log)│          │ (background)│
//!   └──────┬──────┘          └─────────────┘
//!          │
//!          ▼
//!   ┌─────────────┐
//!   │  Metadata   │
//!   │  (snapshot) │
//!   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod cache;
pub mod combine;
pub mod partition;
pub mod record;
pub mod segment;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::{MemoryPressure, PressureSource};
pub use combine::{Adder, Combinator, LastWriteWins};
pub use config::{Config, ConfigBuilder};
pub use error::{Result, StrataError};
pub use record::{BincodeCodec, I64Codec, ValueCodec};
pub use store::{IterAll, Store, Table};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of stratakv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
