//! Background-connection action queue.
//!
//! A foreground process calls into a background execution context that the
//! host platform may suspend or terminate at any moment. This crate decides
//! *when and how* those calls are dispatched, retried and dropped; it is
//! agnostic to *what* is being called.
//!
//! Guarantees:
//!
//! - **One in flight.** A single drain loop dispatches one record at a time.
//! - **FIFO.** Records are dispatched in submission order. A record whose
//!   dispatch failed because the channel died goes back to the head.
//! - **Idempotent resubmission.** A record whose [`ActionId`] is already
//!   queued or in flight is not submitted twice.
//! - **Retry vs. surface.** [`DispatchError::Disconnected`] is a retry signal
//!   and never reaches the caller; [`DispatchError::Application`] is surfaced.
//! - **Ordered bypass.** In the persistent model calls skip the queue but
//!   still reach the connection in submission order.
//!
//! ## Architectural Layer
//!
//! **Queueing rules + port definition.** This crate has no transport I/O.
//! Transport crates implement [`BackgroundConnection`]; callers use
//! [`ActionQueueService`].
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | `ActionId`, `ConnectionGeneration` |
//! | [`types`] | `ActionState`, `Timestamp` |
//! | [`errors`] | `DispatchError`, `BackgroundError`, `ApplicationError`, `ConfigError` |
//! | [`config`] | `BridgeConfig`, `ExecutionModel` |
//! | [`record`] | `ActionRecord`, `ActionRequest`, `Continuation` |
//! | [`queue`] | `RetryQueue` |
//! | [`connection`] | `BackgroundConnection` port, `ConnectionRegistry` |
//! | [`service`] | `ActionQueueService`, `PendingAction` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use bridge::{ActionQueueService, BridgeConfig};
//!
//! let service = ActionQueueService::new(BridgeConfig::default());
//! let state = service.submit_request_to_background("getState", vec![], None);
//! service.set_background_connection(connection);
//! let value = state.await?;
//! ```

pub mod config;
pub mod connection;
mod direct;
pub mod errors;
pub mod identifiers;
mod processor;
pub mod queue;
pub mod record;
pub mod service;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{BridgeConfig, ExecutionModel};
pub use connection::{BackgroundConnection, ConnectionRegistry, InstalledConnection};
pub use errors::{ApplicationError, BackgroundError, ConfigError, DispatchError};
pub use identifiers::{ActionId, ConnectionGeneration};
pub use queue::RetryQueue;
pub use record::{ActionOutcome, ActionRecord, ActionRequest, Continuation};
pub use service::{ActionQueueService, PendingAction};
pub use types::{ActionState, Timestamp};
