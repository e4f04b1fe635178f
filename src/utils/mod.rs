//! Utility modules: developer event log, numeric helpers.
pub mod devlog;
pub mod num;
