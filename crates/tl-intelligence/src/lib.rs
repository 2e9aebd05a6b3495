//! Leaf decision components of the taskline pipeline: classification,
//! model tier resolution and context compilation, plus the external
//! collaborator seams they read from.

pub mod availability;
pub mod classifier;
pub mod context_compiler;
pub mod manifest;
pub mod model_tiers;
pub mod retrieval;
