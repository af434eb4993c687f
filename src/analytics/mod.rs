//! Click analytics
//!
//! Successful resolutions emit [`ClickEvent`]s into the [`ClickAggregator`],
//! which logs them durably and keeps per-link hourly counters off the
//! redirect hot path.

pub mod aggregator;
pub mod models;
pub mod source;

pub use aggregator::{ClickAggregator, LinkPhase};
pub use models::{ClickEvent, Granularity, LinkStats, ReplayReport, SourceMetadata, StatsBucket};
pub use source::extract_source;
