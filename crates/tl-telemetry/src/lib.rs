//! Observability for the taskline pipeline.
//!
//! - **Logging**: stderr `tracing-subscriber` setup (human or JSON) and the
//!   per-command span carrying service and pipeline mode
//! - **Metrics**: labelled counters for stage transitions, review decisions
//!   and audit verdicts, plus validation command timings

pub mod logging;
pub mod metrics;
