//! Rulecheck - LSP Server Library
//!
//! Document synchronization, rule-based diagnostics and quick fixes for the
//! Language Server Protocol.

pub mod actions;
pub mod config;
pub mod diagnostics;
pub mod document;
pub mod engine;
pub mod rules;
pub mod server;
pub mod session;
pub mod text;

pub use config::Config;
pub use document::{DocumentError, DocumentStore};
pub use engine::{DiagnosticEngine, DiagnosticPublisher};
pub use rules::{PatternRule, Rule, RuleSet};
pub use server::RulecheckServer;
pub use session::Session;
