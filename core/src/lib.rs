pub mod build;
pub mod config;
pub mod grading;
pub mod report;
pub mod serdable;
pub mod similarity;
pub mod str_interp;
pub mod style;
pub mod testing;

#[cfg(test)]
mod testutil;

pub use crate::config::Config;
