//! Control-flow graphs: construction from structured bodies and the
//! fixpoint driver that proves every obligation along them.
pub mod analysis;
pub mod builder;

pub use analysis::{AnalyzedFunction, analyze_function, propagate};
pub use builder::build_cfg;
