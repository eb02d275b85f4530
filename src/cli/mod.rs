//! Command-line interface: argument parsing and command dispatch.

pub mod commands;
pub mod parser;
