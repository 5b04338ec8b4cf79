//! The connection port and the registry that holds the active connection.
//!
//! Transport crates implement [`BackgroundConnection`]; the queue never sees
//! anything more specific. The [`ConnectionRegistry`] holds at most one
//! installed connection and replaces it wholesale.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::{ConnectionGeneration, DispatchError};

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// A channel to the background execution context.
///
/// Implementations must report [`DispatchError::Disconnected`] when the channel
/// dies mid-call, and [`DispatchError::Application`] only when the remote
/// method itself failed. The processor's retry decision depends entirely on
/// that distinction.
#[async_trait]
pub trait BackgroundConnection: Send + Sync {
    /// Whether the channel is currently usable for dispatch.
    fn is_ready(&self) -> bool;

    /// Invokes `method` with `args` in the background context.
    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, DispatchError>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// A connection captured from the registry together with its generation.
#[derive(Clone)]
pub struct InstalledConnection {
    /// The connection itself.
    pub connection: Arc<dyn BackgroundConnection>,
    /// Generation assigned when it was installed.
    pub generation: ConnectionGeneration,
}

impl std::fmt::Debug for InstalledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledConnection")
            .field("generation", &self.generation)
            .field("ready", &self.connection.is_ready())
            .finish()
    }
}

#[derive(Debug)]
struct Slot {
    current: Option<InstalledConnection>,
    last_generation: ConnectionGeneration,
}

/// Holds zero or one installed [`BackgroundConnection`].
///
/// Readers take a cloned [`InstalledConnection`] snapshot; a replacement never
/// affects a call already dispatched against an earlier snapshot.
#[derive(Debug)]
pub struct ConnectionRegistry {
    slot: RwLock<Slot>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(Slot {
                current: None,
                last_generation: ConnectionGeneration::new(0),
            }),
        }
    }

    /// Installs `connection`, replacing any previous one, and returns its
    /// generation.
    pub fn install(&self, connection: Arc<dyn BackgroundConnection>) -> ConnectionGeneration {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let generation = slot.last_generation.next();
        slot.last_generation = generation;
        slot.current = Some(InstalledConnection {
            connection,
            generation,
        });
        generation
    }

    /// Removes the installed connection, returning it.
    pub fn clear(&self) -> Option<InstalledConnection> {
        self.slot
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .take()
    }

    /// Snapshot of the installed connection, if any.
    pub fn current(&self) -> Option<InstalledConnection> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Snapshot of the installed connection if it reports itself ready.
    pub fn ready(&self) -> Option<InstalledConnection> {
        self.current().filter(|c| c.connection.is_ready())
    }

    /// Generation of the most recent install (`0` before the first one). A
    /// cleared registry keeps the last generation.
    pub fn generation(&self) -> ConnectionGeneration {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_generation
    }
}
