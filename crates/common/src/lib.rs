//! Shared utilities for the faucet workspace: logging setup, config-file
//! loading and unit conversions.

pub mod utils;
