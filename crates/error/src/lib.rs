//! The error types used by the various parts of the Corten code generator.
//!
//! Errors are separated by the phase they occur in so that callers can depend
//! on exactly the taxonomy they need.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod emit;
