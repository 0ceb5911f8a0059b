//! # waggle-core: Coordination Engine for Cooperating Agents
//!
//! Core domain logic for the Waggle coordination server: the message
//! pipeline, the advisory file-reservation engine, the contact-policy
//! enforcer, and the dual persistence layer (SQLite + git archive).
//!
//! ## Architecture
//!
//! - **BMC Layer**: stateless controllers for all database operations
//! - **Model Structs**: serializable DTOs for every entity
//! - **ModelManager**: central handle for the database connection, the git
//!   repository cache, and the per-archive lock
//! - **Archive**: every write is mirrored to a git-tracked on-disk tree for
//!   audit and human review
//!
//! ## Key Modules
//!
//! - [`model`]: BMC controllers and data models
//! - [`store`]: database pool, git operations, archive layout and lock
//! - [`utils`]: pure helpers (slugs, names, glob overlap, summarization)

/// Request context for attribution.
pub mod ctx;

/// Error types and Result alias for waggle-core operations.
pub mod error;

/// Optional LLM completion client used for summary refinement.
pub mod llm;

/// Backend Model Controllers (BMC) and data models for all entities.
pub mod model;

/// Low-level storage operations for database and git.
pub mod store;

/// Utility functions and helpers.
pub mod utils;

// Re-export core types
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use model::ModelManager;
