//! Process-wide interrupt handling
//!
//! Once tokio has installed its SIGINT handler it stays installed, so a
//! server cannot stop listening on its own. Servers register a shutdown
//! hook here instead and a single listener thread runs the hooks of every
//! registered server. With nothing registered, an interrupt ends the
//! process with status 130 as the default handler would.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once, OnceLock};
use tracing::{info, warn};

/// Exit status of a process terminated by SIGINT
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

type Hook = Arc<dyn Fn() -> usize + Send + Sync>;

struct Entry {
    hook: Hook,
    exit: bool,
}

/// What an interrupt did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// No server was registered
    Unhandled,
    /// Every registered hook ran; `exit` is set if any server asked for
    /// the process to end afterwards
    Closed { connections: usize, exit: bool },
}

/// Shutdown hooks of the live servers
#[derive(Default)]
pub struct SignalRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Entry>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook returning the number of connections it closed
    pub fn insert<F>(&self, hook: F, exit: bool) -> u64
    where
        F: Fn() -> usize + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(
            id,
            Entry {
                hook: Arc::new(hook),
                exit,
            },
        );
        id
    }

    pub fn remove(&self, id: u64) -> bool {
        self.entries.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every registered hook. Hooks run without the lock held.
    pub fn interrupt(&self) -> Interrupt {
        let entries: Vec<(Hook, bool)> = self
            .entries
            .lock()
            .values()
            .map(|entry| (Arc::clone(&entry.hook), entry.exit))
            .collect();
        if entries.is_empty() {
            return Interrupt::Unhandled;
        }

        let mut connections = 0;
        let mut exit = false;
        for (hook, wants_exit) in entries {
            connections += hook();
            exit |= wants_exit;
        }
        Interrupt::Closed { connections, exit }
    }
}

/// The registry the interrupt listener serves
pub fn registry() -> &'static SignalRegistry {
    static REGISTRY: OnceLock<SignalRegistry> = OnceLock::new();
    REGISTRY.get_or_init(SignalRegistry::new)
}

/// Registration of one server; dropping it deregisters the hook
#[derive(Debug)]
pub struct SignalGuard {
    id: u64,
}

impl SignalGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        registry().remove(self.id);
    }
}

/// Register `hook` to run on SIGINT. The listener thread is started on
/// first use.
pub fn register<F>(hook: F, exit: bool) -> SignalGuard
where
    F: Fn() -> usize + Send + Sync + 'static,
{
    static LISTENER: Once = Once::new();
    LISTENER.call_once(spawn_listener);

    SignalGuard {
        id: registry().insert(hook, exit),
    }
}

/// The listener owns its own runtime so it outlives the runtime of
/// whichever server registered first.
fn spawn_listener() {
    let spawned = std::thread::Builder::new()
        .name("asset-server-signal".to_string())
        .spawn(|| {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("Cannot listen for interrupt signal: {}", err);
                    return;
                }
            };
            runtime.block_on(async {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        warn!("Cannot listen for interrupt signal: {}", err);
                        return;
                    }
                    match registry().interrupt() {
                        Interrupt::Unhandled => std::process::exit(INTERRUPTED_EXIT_CODE),
                        Interrupt::Closed { connections, exit } => {
                            info!("Interrupted, closed {} connections", connections);
                            if exit {
                                std::process::exit(0);
                            }
                        }
                    }
                }
            });
        });
    if let Err(err) = spawned {
        warn!("Cannot start interrupt listener: {}", err);
    }
}
