//! # stagegate
//!
//! Command-line front end for the stagegate-core pipeline engine.

pub mod cli;
pub mod config;
