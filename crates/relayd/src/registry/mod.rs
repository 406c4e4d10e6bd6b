//! Connection registry using the Actor pattern.
//!
//! The registry is the hub's coordinator: the single owner of the
//! live-connection map and the only place fan-out happens. It receives
//! commands via a tokio mpsc channel and publishes membership events on a
//! broadcast channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Hub / HTTP API  │────▶│  RegistryActor  │────▶│ Connection       │
//! │ Connection loops│     │                 │     │ mailboxes        │
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │
//!         │   RegistryCommand     │   RegistryEvent
//!         │   (mpsc channel)      │   (broadcast)
//!         ▼                       ▼
//!   Register/Unregister/    HashMap<UserId,
//!   Dispatch                ConnectionHandle>
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEFAULT_MAX_CONNECTIONS};
pub use commands::{
    DisconnectReason, HubStats, Registration, RegistryCommand, RegistryError, RegistryEvent,
};
pub use handle::RegistryHandle;

/// Shortest sweep period; `interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Sizing for the registry actor's channels and map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    /// Capacity of the command queue; dispatches beyond it are dropped
    pub command_buffer: usize,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
    pub max_connections: usize,
    /// How often entries with a closed mailbox are swept
    pub sweep_interval: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            command_buffer: 1024,
            event_buffer: 256,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// Spawn the registry actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the RegistryActor on a tokio task
/// 3. Spawns a background sweep task
/// 4. Returns a RegistryHandle for client use
///
/// The actor stops once every handle (and the sweep task) is dropped.
///
/// # Example
///
/// ```no_run
/// use relayd::registry::{spawn_registry, RegistrySettings};
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry(RegistrySettings::default());
///     let stats = handle.stats().await;
/// }
/// ```
pub fn spawn_registry(settings: RegistrySettings) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(settings.command_buffer.max(1));
    let (event_tx, _) = broadcast::channel(settings.event_buffer.max(1));

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), settings.max_connections);
    tokio::spawn(actor.run());

    spawn_sweep_task(cmd_tx.downgrade(), settings.sweep_interval);

    RegistryHandle::new(cmd_tx, event_tx)
}

/// Periodically asks the actor to drop connections whose mailbox closed
/// without an unregister reaching it.
///
/// Holds only a weak sender so it never keeps the actor alive.
fn spawn_sweep_task(sender: mpsc::WeakSender<RegistryCommand>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period.max(MIN_SWEEP_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(sender) = sender.upgrade() else {
                debug!("Sweep task stopping: registry stopped");
                break;
            };
            if sender.send(RegistryCommand::SweepClosed).await.is_err() {
                debug!("Sweep task stopping: registry channel closed");
                break;
            }
        }
    });
}
