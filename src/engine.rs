// The boundary to the native call-control engine. Everything behind
// `NativeEngine` is a black box: the SIP stack, RTP, codec negotiation and
// the thread(s) driving them belong to the engine. The bridge only submits
// commands through it and receives callbacks through the `CallbackSink`
// handed over at init.
use std::fmt;
use std::sync::Arc;

use crate::core::RegistrationState;
use crate::events::{EventQueue, QueueItem};

/// The engine's own identifier for one ongoing session. Borrowed, never
/// owned: it stays valid only until the engine reports the session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Call phases as the engine computes them. The bridge consumes these; it
/// never derives signaling state on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProgress {
    Dialing,
    Ringing,
    EarlyMedia,
    Established,
    Held,
    Terminating,
}

/// One callback from the engine, exactly as emitted, before translation.
#[derive(Debug, Clone)]
pub enum NativeCallback {
    IncomingCall {
        session: SessionHandle,
        peer: String,
    },
    CallStateChanged {
        session: SessionHandle,
        progress: SessionProgress,
    },
    MediaEstablished {
        session: SessionHandle,
    },
    DtmfReceived {
        session: SessionHandle,
        digit: char,
    },
    CallClosed {
        session: SessionHandle,
        code: u16,
        text: String,
    },
    RegistrationChanged {
        state: RegistrationState,
        detail: Option<String>,
    },
}

/// Error from the engine itself. Opaque to the host: init failures are
/// mapped to `BridgeError::EngineInit` at start, command failures surface
/// later as events, never synchronously.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        EngineError(message.into())
    }
}

/// Handed to the engine at `init`. The engine invokes `deliver` from its
/// own thread(s) for every callback; delivery never blocks and never fails.
#[derive(Clone)]
pub struct CallbackSink {
    queue: Arc<EventQueue>,
}

impl CallbackSink {
    pub(crate) fn new(queue: Arc<EventQueue>) -> Self {
        CallbackSink { queue }
    }

    pub fn deliver(&self, callback: NativeCallback) {
        self.queue.push(QueueItem::Callback(callback));
    }
}

/// The consumed capabilities of the native engine.
///
/// Contract:
/// - `init` starts the engine and its background thread(s); callbacks flow
///   through the sink from then on. The engine must not emit a callback
///   referencing a session before `place_call` has returned its handle.
/// - `shutdown` terminates every live session (emitting a closed callback
///   for each), quiesces and joins the engine thread(s), and blocks until
///   done. It is idempotent.
/// - Command methods are thread-safe submission entry points; they hand
///   the work to the engine's execution context and return promptly.
pub trait NativeEngine: Send + Sync {
    fn init(&self, config: &crate::core::BridgeConfig, sink: CallbackSink)
    -> std::result::Result<(), EngineError>;

    fn shutdown(&self);

    fn place_call(&self, peer: &str) -> std::result::Result<SessionHandle, EngineError>;

    fn answer(&self, session: SessionHandle) -> std::result::Result<(), EngineError>;

    fn hangup(&self, session: SessionHandle, code: u16) -> std::result::Result<(), EngineError>;

    fn send_dtmf(&self, session: SessionHandle, digit: char)
    -> std::result::Result<(), EngineError>;

    fn hold(&self, session: SessionHandle) -> std::result::Result<(), EngineError>;

    fn resume(&self, session: SessionHandle) -> std::result::Result<(), EngineError>;
}
