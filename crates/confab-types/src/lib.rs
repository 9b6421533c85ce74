//! Shared types for the confab voice-talk platform.
//!
//! This crate provides the foundational types used across the confab
//! workspace: robot persona definitions and chat history elements. No crate
//! in the workspace depends on anything *except* `confab-types` for
//! cross-cutting type definitions, which keeps the dependency graph clean
//! and prevents circular dependencies.

pub mod chat;
pub mod robot;

pub use chat::{ChatMessage, ChatRole};
pub use robot::Robot;
