//! Core engine: ingest pipeline, fingerprint cache, placement policy, and
//! the corpus consistency auditor.

pub mod auditor;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod fingerprint;
pub mod frontmatter;
pub mod fs_ops;
pub mod models;
pub mod pipeline;
pub mod placement;

pub use cancel::CancelFlag;
pub use error::EngineError;
