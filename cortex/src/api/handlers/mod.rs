//! HTTP request handlers.
//!
//! - [`chat`]: single-prompt calls, smart or explicit, plain and streaming
//! - [`compare`]: multi-target fan-out, plain and streaming
//! - [`requests`]: audit trail lookups by request and group id
//! - [`providers`]: registered providers and tier layout
//! - [`health`]: liveness
//!
//! Handlers return [`crate::errors::Error`], which converts into a JSON error body with the
//! matching status code. Streaming handlers reject invalid or unauthorized requests with a plain
//! error response before any event is sent.

pub mod chat;
pub mod compare;
pub mod health;
pub mod providers;
pub mod requests;
pub(crate) mod stream;
