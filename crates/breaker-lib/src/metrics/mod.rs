//! Call metric collection
//!
//! A bounded window of per-call observations feeding the learning stack,
//! plus the system load sampler that annotates each record.

mod sysload;
mod window;

pub use sysload::SystemLoad;
pub use window::{MetricSnapshot, MetricWindow};
