pub mod displayed;
pub mod stats;
pub mod summary;
pub mod verifier;

pub use displayed::{skill, verify_displayed, SkillReport};
pub use stats::{aggregate, recompute, RecomputeReport};
pub use summary::summarize_day;
pub use verifier::verify;
