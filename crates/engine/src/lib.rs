//! Activation & forgetting engine
//!
//! - `activation`: the ACT-R activation maths, access-history trimming and
//!   forgetting-curve projection
//! - `forgetting`: the compaction cycle that merges low-activation
//!   Statement+Entity pairs into consolidated summaries

pub mod activation;
pub mod forgetting;

pub use activation::{trim_history, ActivationEngine, CurvePoint};
pub use forgetting::{ForgettingReport, ForgettingScheduler};
