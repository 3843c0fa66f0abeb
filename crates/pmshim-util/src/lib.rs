#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for pmshim.
//!
//! Pure helper functions with no logging/tracing dependencies.
//! Logging is handled by the CLI and core crates.

pub mod fs;
