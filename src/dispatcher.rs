// The command dispatcher: the one safe crossing point from host threads
// into the native engine. Commands are marshalled onto a single worker
// task; only that task (and shutdown) ever touches the engine's command
// entry points after start.
//
// The dispatcher reports submission outcomes only. Semantic validation
// lives in the call object, and a command's real outcome arrives later as
// an event, never through the submission result.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{BridgeError, CallId, CloseReason, Result};
use crate::engine::{EngineError, NativeEngine, SessionHandle};
use crate::events::{EventQueue, QueueItem};
use crate::registry::CallRegistry;

#[derive(Debug)]
pub(crate) enum EngineCommand {
    PlaceCall { call_id: CallId, peer: String },
    Answer { call_id: CallId },
    Hangup { call_id: CallId, code: u16 },
    SendDtmf { call_id: CallId, digit: char },
    Hold { call_id: CallId },
    Resume { call_id: CallId },
    // Internal: terminates the worker during stop().
    Shutdown,
}

#[derive(Clone)]
pub(crate) struct CommandDispatcher {
    tx: mpsc::Sender<EngineCommand>,
    running: Arc<AtomicBool>,
}

impl CommandDispatcher {
    pub(crate) fn new() -> (Self, mpsc::Receiver<EngineCommand>) {
        let (tx, rx) = mpsc::channel(64);
        let dispatcher = CommandDispatcher {
            tx,
            running: Arc::new(AtomicBool::new(false)),
        };
        (dispatcher, rx)
    }

    pub(crate) fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    /// All further submissions fail fast with `EngineNotRunning`.
    pub(crate) fn shut_down(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Hand a command over for execution on the engine's context. Returns
    /// once the submission is accepted; it may block only briefly on the
    /// channel, never on native I/O.
    pub(crate) async fn submit(&self, command: EngineCommand) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(BridgeError::EngineNotRunning);
        }
        self.tx
            .send(command)
            .await
            .map_err(|_| BridgeError::EngineNotRunning)
    }

    /// Queue the worker terminator behind whatever is already in flight.
    pub(crate) async fn submit_shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown).await;
    }

    pub(crate) fn spawn_worker(
        &self,
        rx: mpsc::Receiver<EngineCommand>,
        engine: Arc<dyn NativeEngine>,
        registry: Arc<CallRegistry>,
        queue: Arc<EventQueue>,
    ) -> JoinHandle<()> {
        let running = self.running.clone();
        tokio::spawn(run_worker(rx, engine, registry, queue, running))
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<EngineCommand>,
    engine: Arc<dyn NativeEngine>,
    registry: Arc<CallRegistry>,
    queue: Arc<EventQueue>,
    running: Arc<AtomicBool>,
) {
    while let Some(command) = rx.recv().await {
        if matches!(command, EngineCommand::Shutdown) {
            break;
        }

        if !running.load(Ordering::SeqCst) {
            // Stopping: nothing reaches the engine anymore, but a pending
            // dial must still close so the call cannot leak.
            match command {
                EngineCommand::PlaceCall { call_id, .. } => {
                    queue.push(QueueItem::DialFailed {
                        call_id,
                        reason: CloseReason::local("engine stopped"),
                    });
                }
                other => debug!(?other, "command dropped during shutdown"),
            }
            continue;
        }

        match command {
            EngineCommand::PlaceCall { call_id, peer } => {
                let placed = registry.bind_outbound(call_id, || engine.place_call(&peer));
                if let Err(error) = placed {
                    warn!(call = %call_id, %error, "engine refused dial");
                    queue.push(QueueItem::DialFailed {
                        call_id,
                        reason: CloseReason::local(error.0),
                    });
                }
            }
            EngineCommand::Answer { call_id } => {
                if let Some(session) = resolve(&registry, call_id) {
                    log_outcome(call_id, "answer", engine.answer(session));
                }
            }
            EngineCommand::Hangup { call_id, code } => {
                if let Some(session) = resolve(&registry, call_id) {
                    log_outcome(call_id, "hangup", engine.hangup(session, code));
                }
            }
            EngineCommand::SendDtmf { call_id, digit } => {
                if let Some(session) = resolve(&registry, call_id) {
                    log_outcome(call_id, "dtmf", engine.send_dtmf(session, digit));
                }
            }
            EngineCommand::Hold { call_id } => {
                if let Some(session) = resolve(&registry, call_id) {
                    log_outcome(call_id, "hold", engine.hold(session));
                }
            }
            EngineCommand::Resume { call_id } => {
                if let Some(session) = resolve(&registry, call_id) {
                    log_outcome(call_id, "resume", engine.resume(session));
                }
            }
            EngineCommand::Shutdown => unreachable!(),
        }
    }
    debug!("command worker exited");
}

// The target session is resolved at execution time, not submission time:
// a command queued behind the placement that creates its session always
// finds it, and one racing a close is dropped here instead of reaching a
// dead handle.
fn resolve(registry: &CallRegistry, call_id: CallId) -> Option<SessionHandle> {
    let session = registry.session_for(call_id);
    if session.is_none() {
        debug!(call = %call_id, "command target already gone");
    }
    session
}

// Engine-side failures are not reported back to the submitter; whatever
// the engine does about them arrives as a later event.
fn log_outcome(call_id: CallId, op: &str, outcome: std::result::Result<(), EngineError>) {
    if let Err(error) = outcome {
        warn!(call = %call_id, op, %error, "engine rejected command");
    }
}
