//! hearthproto - Protocol types for the Hearth MCP gateway
//!
//! This crate defines the message types exchanged on both sides of the
//! gateway:
//!
//! - **Upstream** (`upstream` module): the MCP envelopes pushed to clients
//!   over SSE and the closed set of client messages accepted on the
//!   companion POST channel. The client message set is a tagged enum so
//!   dispatch is checked exhaustively at compile time.
//! - **Downstream** (`downstream` module): the JSON frames spoken on the
//!   persistent WebSocket to the home-automation backend - command frames
//!   carrying an integer `id`, correlated responses, and unsolicited
//!   `event` frames.
//!
//! The gateway-wide error taxonomy lives in `error`. Tool catalog entries
//! and their hand-built input schemas live in `catalog`.

pub mod catalog;
pub mod downstream;
pub mod error;
pub mod upstream;

pub use catalog::{object_schema, ToolSpec};
pub use downstream::InboundFrame;
pub use error::GatewayError;
pub use upstream::{Capabilities, ClientMessage, ServerMessage};

/// Protocol identifier sent in the handshake envelope.
pub const MCP_PROTOCOL: &str = "mcp/1.0";
