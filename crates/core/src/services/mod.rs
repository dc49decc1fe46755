//! Operations built on the settings store and binary manager.

pub mod reduce;
pub mod run_bin;
