//! # fbs-core
//!
//! Shared logic for the file-based search indexer: the document model,
//! phenomenon normalization, spatial and temporal normalization, the
//! content-addressed document id, and the [`index::IndexClient`] trait.
//!
//! This crate does no filesystem walking and no network I/O. Backends that
//! talk to a real document store live in the `fbs-indexer` package.

pub mod index;
pub mod models;
pub mod phenomena;
pub mod spatial;
pub mod temporal;

pub use models::{document_id, FileMetadata, IndexDocument, ReadStatus};
pub use phenomena::Phenomenon;
pub use spatial::SpatialEnvelope;
pub use temporal::TemporalRange;
