//! Graph storage backends for the knowledge graph.
//!
//! This module provides implementations of the [`GraphStore`] trait for
//! storing and querying entities and relationships.
//!
//! # Available Backends
//!
//! | Backend | Use Case | Features |
//! |---------|----------|----------|
//! | [`SqliteGraphStore`] | Default; embedded | Unique merge keys, batched candidate SQL |
//! | [`InMemoryGraphStore`] | Testing | Fast, no persistence |
//!
//! # Example
//!
//! ```rust,ignore
//! use gromozeka_memory::storage::graph::SqliteGraphStore;
//! use gromozeka_memory::models::{EntityDraft, TenantId};
//!
//! let store = SqliteGraphStore::new("graph.db")?;
//! let kotlin = store
//!     .merge_entity(EntityDraft::new(TenantId::new("default"), "Kotlin", "Technology"))
//!     .await?;
//! ```

mod memory;
mod sqlite;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

// Re-export trait for convenience
pub use crate::storage::traits::GraphStore;
