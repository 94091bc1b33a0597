//! # Configuration
//!
//! The reputation miner is configured through a `repminer.toml` file. Every section and every
//! field is optional: whatever is missing takes the value from [`defaults`].

#![deny(rust_2018_idioms)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(missing_docs)]

pub mod config;
pub mod defaults;
pub mod dirs;
pub mod loaders;

pub use crate::config::Config;
