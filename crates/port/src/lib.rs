//! In-process message-port transport for the background bridge.
//!
//! Models the channel between a foreground process and a background context
//! the platform may terminate at any time. [`BackgroundHost`] plays the
//! background: it serves registered [`MethodHandler`]s. Each
//! [`BackgroundHost::connect`] opens a port and returns the foreground
//! [`PortConnection`] (an implementation of [`bridge::BackgroundConnection`])
//! plus a [`PortHandle`] that can terminate the background side.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Framing, correlation of requests and responses, and
//! disconnect detection live here. The [`bridge`] crate sees only
//! [`bridge::BackgroundConnection`].
//!
//! ## Disconnect semantics
//!
//! When the port closes, every call still awaiting a reply fails with
//! [`bridge::DispatchError::Disconnected`] and [`PortConnection`] stops
//! reporting ready. Handler failures are reported as
//! [`bridge::DispatchError::Application`]; an unknown method yields code
//! [`METHOD_NOT_FOUND`].

pub mod connection;
pub mod frame;
pub mod host;

pub use connection::{PortConnection, PortHandle};
pub use frame::{FrameError, PortFrame, METHOD_NOT_FOUND, PARSE_ERROR};
pub use host::{BackgroundHost, MethodHandler};
