//! HTTP surface.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: request and response bodies
//!
//! # Routes
//!
//! - `POST /v1/chat`, `POST /v1/chat/stream`: single-prompt calls
//! - `POST /v1/compare`, `POST /v1/compare/stream`: multi-target fan-out
//! - `GET /v1/requests/{id}`, `GET /v1/groups/{id}`: audit trail lookups
//! - `GET /v1/providers`: registered providers and routing tiers
//! - `GET /health`: liveness
//!
//! OpenAPI documentation is served at `/docs`, with the raw document at `/openapi.json`.

pub mod handlers;
pub mod models;
