//! plinq - parallel LINQ-style queries over in-memory sequences
//!
//! A query chunks its source, fans the chunks out to a pool of worker
//! threads that run the composed operator chain plus a per-chunk
//! aggregator, and streams the partial results back to the caller.

pub mod chain;
mod engine;
pub mod errors;
pub mod query;

pub use errors::{QueryError, QueryResult};
pub use query::{DistributedQuery, QueryIter};
