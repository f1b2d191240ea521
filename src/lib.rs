//! Mini-Agent - a minimal coding agent
//!
//! This library drives a tool-using model over Anthropic-, OpenAI- and
//! Z.AI-compatible endpoints, with a CLI and a JSON-RPC front-end.

pub mod adapters;
pub mod agent;
pub mod config;
pub mod error;
pub mod gate;
pub mod tools;
pub mod ui;

pub use error::{Error, Result};
