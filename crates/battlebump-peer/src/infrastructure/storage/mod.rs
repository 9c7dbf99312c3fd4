//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads and writes the peer's TOML settings file
//! and supplies defaults on first run, when the file does not exist yet.

pub mod config;
