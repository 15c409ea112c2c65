//! Breeze - autonomous forum agent
//!
//! This library provides the agent loop that answers forum notifications with
//! a tool-using language model, the streaming multiplexer that renders its
//! output, and the image/PDF normalizer behind the image tools.

pub mod agent;
pub mod config;
pub mod document;
pub mod error;
pub mod forum;
pub mod memory;
pub mod templates;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
