//! Per-plugin lifecycle: a small state machine driven by a dedicated
//! execution thread with cooperative pause/resume/stop.
//!
//! The controlling thread owns flag sets and the Initialized/Running entry
//! transitions (serialized by a per-plugin lock); the execution thread owns
//! the Running⇄Paused transitions it takes from inside its loop. Pause and
//! stop are observed at iteration boundaries, never preemptively.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use caravel_client::ClientHandle;
use caravel_plugin_sdk::{Cadence, ControlEntry, Plugin};
use crossbeam_channel::Sender;
use libloading::Library;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use crate::error::LifecycleError;
use crate::registry::PluginId;

/// Lifecycle states of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed and registered, but not yet handed a client.
    Unregistered = 0,
    Initialized = 1,
    Running = 2,
    Paused = 3,
    /// Terminal.
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unregistered,
            1 => Self::Initialized,
            2 => Self::Running,
            3 => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

/// How a plugin's execution loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The loop observed a stop request.
    Stopped,
    /// A unit of work failed or panicked.
    Failed(String),
}

/// Sent to the host when a plugin's loop exits so it can drop the plugin
/// from its active set.
#[derive(Debug, Clone)]
pub struct PluginEvent {
    pub id: PluginId,
    pub name: String,
    pub outcome: ExitOutcome,
}

/// State shared between the controlling thread and the execution thread.
struct Shared {
    state: AtomicU8,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    /// Resume token; granted by `resume`/`stop`, consumed by the parked loop.
    gate: Mutex<bool>,
    resumed: Condvar,
    control: OnceCell<ControlEntry>,
    events: Sender<PluginEvent>,
}

impl Shared {
    fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// What the handle currently owns. The plugin object (and its backing
/// library, for dynamically loaded plugins) moves into the execution thread
/// at start and is dropped there.
enum Slot {
    Constructed {
        plugin: Box<dyn Plugin>,
        library: Option<Library>,
    },
    Ready {
        plugin: Box<dyn Plugin>,
        library: Option<Library>,
        client: Arc<ClientHandle>,
    },
    Running {
        thread: JoinHandle<()>,
    },
    Finished,
}

/// A registered plugin, exclusively owned by the host.
pub struct PluginHandle {
    id: PluginId,
    name: String,
    shared: Arc<Shared>,
    slot: Mutex<Slot>,
}

impl PluginHandle {
    pub(crate) fn new(
        id: PluginId,
        plugin: Box<dyn Plugin>,
        library: Option<Library>,
        events: Sender<PluginEvent>,
    ) -> Self {
        let name = plugin.descriptor().name;
        Self {
            id,
            name,
            shared: Arc::new(Shared {
                state: AtomicU8::new(LifecycleState::Unregistered as u8),
                pause_requested: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                gate: Mutex::new(false),
                resumed: Condvar::new(),
                control: OnceCell::new(),
                events,
            }),
            slot: Mutex::new(Slot::Constructed { plugin, library }),
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.shared.state()
    }

    /// The plugin's control affordance, once initialized.
    pub fn control(&self) -> Option<ControlEntry> {
        self.shared.control.get().cloned()
    }

    /// Hands the plugin its client handle and runs its setup hooks:
    /// Unregistered → Initialized.
    ///
    /// A second initialize is rejected loudly, and any failure discards the
    /// plugin (it can never be started afterwards).
    pub fn initialize(&self, client: &Arc<ClientHandle>) -> Result<(), LifecycleError> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Finished) {
            Slot::Constructed { mut plugin, library } => {
                let control = match plugin.create_control() {
                    Ok(control) => control,
                    Err(err) => {
                        self.shared.set_state(LifecycleState::Stopped);
                        return Err(LifecycleError::Control(err));
                    }
                };
                if let Err(err) = plugin.setup(client) {
                    self.shared.set_state(LifecycleState::Stopped);
                    return Err(LifecycleError::Setup(err));
                }
                let _ = self.shared.control.set(control);
                self.shared.set_state(LifecycleState::Initialized);
                *slot = Slot::Ready {
                    plugin,
                    library,
                    client: Arc::clone(client),
                };
                Ok(())
            }
            other => {
                let err = match &other {
                    Slot::Ready { .. } => LifecycleError::AlreadyInitialized,
                    Slot::Running { .. } => LifecycleError::AlreadyInitialized,
                    _ => LifecycleError::AlreadyStopped,
                };
                *slot = other;
                Err(err)
            }
        }
    }

    /// Spawns the plugin's execution thread: Initialized → Running.
    pub fn start(&self) -> Result<(), LifecycleError> {
        let mut slot = self.slot.lock();
        match std::mem::replace(&mut *slot, Slot::Finished) {
            Slot::Ready {
                plugin,
                library,
                client,
            } => {
                let shared = Arc::clone(&self.shared);
                let id = self.id;
                let name = self.name.clone();
                let spawned = thread::Builder::new().name(self.name.clone()).spawn(move || {
                    run_loop(plugin, client, &shared, id, name);
                    // The plugin was dropped inside `run_loop`; only now is
                    // it safe to unmap its code.
                    drop(library);
                });
                let thread = match spawned {
                    Ok(thread) => thread,
                    Err(err) => {
                        self.shared.set_state(LifecycleState::Stopped);
                        return Err(LifecycleError::Spawn(err));
                    }
                };
                self.shared.set_state(LifecycleState::Running);
                *slot = Slot::Running { thread };
                Ok(())
            }
            other => {
                let err = match &other {
                    Slot::Constructed { .. } => LifecycleError::NotInitialized,
                    Slot::Running { .. } if self.shared.state() != LifecycleState::Stopped => {
                        LifecycleError::AlreadyStarted
                    }
                    _ => LifecycleError::AlreadyStopped,
                };
                *slot = other;
                Err(err)
            }
        }
    }

    /// Requests a pause; the loop honors it at its next iteration boundary.
    pub fn pause(&self) {
        let _ = self.shared.pause_requested.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Wakes a paused loop. A no-op when no pause is pending and the loop is
    /// not parked, so a stray resume never pre-empts a future pause.
    pub fn resume(&self) {
        let mut granted = self.shared.gate.lock();
        if self.shared.pause_requested.load(Ordering::Acquire)
            || self.shared.state() == LifecycleState::Paused
        {
            *granted = true;
        }
        self.shared.resumed.notify_all();
    }

    /// Requests a stop. Implies a resume so a paused loop can observe the
    /// flag and exit; the request is honored at the next iteration boundary.
    pub fn stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        let _granted = self.shared.gate.lock();
        self.shared.resumed.notify_all();
    }

    /// Waits for the execution thread to finish, if one was ever started.
    pub fn join(&self) {
        let thread = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Finished) {
                Slot::Running { thread } => Some(thread),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(thread) = thread {
            if thread.join().is_err() {
                log::error!("plugin thread for {} terminated abnormally", self.name);
            }
        }
    }
}

fn run_loop(
    mut plugin: Box<dyn Plugin>,
    client: Arc<ClientHandle>,
    shared: &Arc<Shared>,
    id: PluginId,
    name: String,
) {
    let outcome = 'run: loop {
        {
            // The pause flag is consumed under the gate lock so a resume
            // issued right after the pause cannot slip between the check and
            // the park.
            let mut granted = shared.gate.lock();
            while shared
                .pause_requested
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                shared.set_state(LifecycleState::Paused);
                while !*granted && !shared.stop_requested.load(Ordering::Acquire) {
                    shared.resumed.wait(&mut granted);
                }
                *granted = false;
                if shared.stop_requested.load(Ordering::Acquire) {
                    break;
                }
                shared.set_state(LifecycleState::Running);
            }
        }
        if shared.stop_requested.load(Ordering::Acquire) {
            break 'run ExitOutcome::Stopped;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| plugin.tick(&client))) {
            Ok(Ok(Cadence::Immediate)) => {}
            Ok(Ok(Cadence::After(delay))) => sleep_full(delay),
            Ok(Err(err)) => {
                log::error!("plugin {name} failed: {err:#}");
                break 'run ExitOutcome::Failed(format!("{err:#}"));
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                log::error!("plugin {name} panicked: {reason}");
                break 'run ExitOutcome::Failed(reason);
            }
        }
    };

    shared.set_state(LifecycleState::Stopped);
    if let Some(control) = shared.control.get() {
        control.set_enabled(false);
    }
    drop(plugin);
    let _ = shared.events.send(PluginEvent { id, name, outcome });
}

/// Sleeps the full duration, re-arming after spurious wakeups by computing
/// the remaining time to the deadline.
fn sleep_full(duration: Duration) {
    let deadline = Instant::now() + duration;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "the work unit panicked".to_string()
    }
}
