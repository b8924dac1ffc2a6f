//! Core types, config, and errors for FinVox.

pub mod config;
pub mod error;
pub mod session;
