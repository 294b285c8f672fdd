//! CLI command implementations.

pub mod clear;
pub mod export;
pub mod import;
pub mod show;
pub mod status;
