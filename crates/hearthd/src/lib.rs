//! hearthd - MCP gateway library for the Hearth system
//!
//! This library provides:
//! - `auth`: auth gate (pending auth states, opaque token cache)
//! - `dispatch`: stateless MCP message dispatcher
//! - `message`: companion POST endpoint for client→server messages
//! - `serve`: gateway server (router assembly, health, shutdown)
//! - `session`: session registry with capacity admission
//! - `sse`: SSE transport and per-session message pump
//! - `tls`: self-signed certificate generation and rustls loading
//! - `tools`: tool execution boundary over the backend link

pub mod auth;
pub mod dispatch;
pub mod message;
pub mod serve;
pub mod session;
pub mod sse;
pub mod tls;
pub mod tools;
