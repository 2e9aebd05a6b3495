//! Stage drivers for the taskline pipeline: routing and prompt rendering,
//! the stage orchestrator, and the two reviewers that judge executor output.

pub mod auditor;
pub mod auto_review;
pub mod checklist;
pub mod notifications;
pub mod orchestrator;
pub mod prompts;
pub mod router;
pub mod validation;
