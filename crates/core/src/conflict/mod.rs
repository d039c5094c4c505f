//! Conflict records, resolve requests, three-way merging, and the
//! multi-pass resolution engine.
//!
//! The conflict subsystem is responsible for:
//! 1. **Modelling** -- what collided, and which resolutions apply to it.
//! 2. **Validation** -- rejecting malformed resolve requests up front.
//! 3. **Merging** -- line-based three-way merges with encoding handling.
//! 4. **Resolution** -- driving a [`ConflictStore`] to a fixed point.

pub mod engine;
pub mod merger;
pub mod model;
pub mod request;

pub use engine::{
    ConflictStore, ResolutionEngine, ResolveFailure, ResolveObserver, ResolveSummary, SkipReason,
};
pub use merger::{ContentMerge, MergeResult, MergeSide, Merger};
pub use model::{Conflict, ConflictType, EncodingStrategy, Resolution, ResolutionOptions};
pub use request::ResolveRequest;
