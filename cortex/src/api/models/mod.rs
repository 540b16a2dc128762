//! API request and response data models.
//!
//! These structures define the public HTTP contract and are kept separate from the audit
//! entities in [`crate::audit::models`] and the domain results in [`crate::models`].
//!
//! - [`chat`]: single-prompt requests and the normalized per-target response
//! - [`compare`]: multi-target requests and the aggregate response
//! - [`stream`]: NDJSON events for the streaming endpoints
//! - [`requests`]: audit trail lookups
//! - [`providers`]: registered providers and the tier layout

pub mod chat;
pub mod compare;
pub mod providers;
pub mod requests;
pub mod stream;
