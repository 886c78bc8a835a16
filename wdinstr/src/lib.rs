//! Intermediate representation for the Warden safety checker.
//!
//! The crate holds everything the analysis consumes and produces that is
//! not analysis logic itself: the bounded-integer type model, expressions
//! and statements, functions and units, the read-only symbol table and the
//! basic-block graph types.
pub mod modules;
pub mod types;
pub mod utils;
