//! monitor-encoder library crate.
//!
//! Watches a directory for job descriptors and runs each job through a
//! staged pipeline of external encoding tools. Exposed as a library so the
//! pipeline can be driven from integration tests.

pub mod active_time;
pub mod api;
pub mod codecs;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod services;
pub mod stages;
pub mod status;
pub mod task;
pub mod template;
pub mod tools;
pub mod utils;

pub use error::{Error, Result};
