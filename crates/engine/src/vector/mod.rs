//! Vector similarity: distance functions and the HNSW index.
//!
//! - `distance`: the metric implementations (lower = closer)
//! - `hnsw`: the multi-layer proximity graph

pub mod distance;
pub mod hnsw;

pub use distance::distance;
pub use hnsw::{HnswConfig, HnswIndex, SearchHit};
