//! ORCHARD Manager Library
//!
//! Operator commands over a running mesh. Every command is a thin
//! composition of `orchard_core` operations; the `orchard` binary only
//! parses arguments and dispatches here.

pub mod commands;
pub mod output;
