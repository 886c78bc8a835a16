//! Static analysis core of the Warden compiler.
//!
//! Every integer operation, index, slice and cast of a [`wdinstr`] unit is
//! proven safe at compile time from a flow-sensitive database of interval and
//! relational facts. Nothing is patched with a runtime check: a function
//! either compiles with all of its obligations discharged or is reported with
//! the first proposition that could not be proven. Suspendible functions are
//! then lowered into resumable state machines over caller-owned continuation
//! records, and re-verified in that form.
//!
//! Most consumers only need [`compiler::Compiler`]. The [`exec`] module runs
//! compiled functions and checks every operation again while doing so.

pub mod cfg;
pub mod compiler;
pub mod diagnostics;
pub mod exec;
pub mod facts;
pub mod magic;
pub mod prover;
pub mod suspend;
pub mod utils;
