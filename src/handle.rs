// The native engine handle: owns the lifecycle of the single engine
// instance. The engine runs its own background thread(s); this side only
// tracks the explicit state machine and the process-wide guard that keeps
// a second engine from starting while one is active.
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::core::{BridgeConfig, BridgeError, Result};
use crate::engine::{CallbackSink, NativeEngine};

// One engine per process. Holds the active account's address-of-record,
// purely for diagnostics.
static ACTIVE_ENGINE: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopping,
    // Terminal: the event channel is spent, a new bridge must be built.
    Stopped,
}

pub(crate) struct EngineHandle {
    engine: Arc<dyn NativeEngine>,
    state: Mutex<Lifecycle>,
}

impl EngineHandle {
    pub(crate) fn new(engine: Arc<dyn NativeEngine>) -> Self {
        EngineHandle {
            engine,
            state: Mutex::new(Lifecycle::Idle),
        }
    }

    pub(crate) fn engine(&self) -> Arc<dyn NativeEngine> {
        self.engine.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == Lifecycle::Running
    }

    pub(crate) fn start(&self, config: &BridgeConfig, sink: CallbackSink) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match *state {
            Lifecycle::Idle => {}
            Lifecycle::Running | Lifecycle::Stopping => return Err(BridgeError::AlreadyRunning),
            Lifecycle::Stopped => {
                return Err(BridgeError::EngineInit(
                    "engine handle already spent, build a new bridge".to_string(),
                ));
            }
        }

        {
            let mut active = ACTIVE_ENGINE.lock().unwrap();
            if let Some(holder) = active.as_deref() {
                warn!(holder, "refusing second engine in this process");
                return Err(BridgeError::AlreadyRunning);
            }
            *active = Some(config.account.aor());
        }

        if let Err(error) = self.engine.init(config, sink) {
            *ACTIVE_ENGINE.lock().unwrap() = None;
            return Err(BridgeError::EngineInit(error.0));
        }

        *state = Lifecycle::Running;
        info!(aor = %config.account.aor(), "engine started");
        Ok(())
    }

    /// Move Running into Stopping. False means there is nothing to stop
    /// (never started, already stopping, or already stopped), which the
    /// caller treats as a successful no-op.
    pub(crate) fn begin_stop(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == Lifecycle::Running {
            *state = Lifecycle::Stopping;
            true
        } else {
            false
        }
    }

    pub(crate) fn finish_stop(&self) {
        *self.state.lock().unwrap() = Lifecycle::Stopped;
        *ACTIVE_ENGINE.lock().unwrap() = None;
        info!("engine stopped");
    }
}
