//! Traffic aggregation
//!
//! Parsed records are classified against the policy and folded into a
//! single [`AggregateState`] owned by the caller. States from separate runs
//! (or separate shards of one run) can be merged afterwards.

pub mod aggregator;
pub mod classifier;
pub mod models;

pub use aggregator::{fold, TrafficAggregator, DEFAULT_KEY};
pub use classifier::{is_on_campus, Classifier};
pub use models::{AggregateState, Bucket, VirtualHostStats, TOTAL_KEY};
