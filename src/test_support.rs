// Test double for the native engine, plus the lock that serializes tests
// exercising the process-wide engine guard.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::core::{BridgeConfig, RegistrationState};
use crate::engine::{
    CallbackSink, EngineError, NativeCallback, NativeEngine, SessionHandle, SessionProgress,
};

// Only one engine may be active per process, so tests that start a bridge
// take this lock for their whole body.
static ENGINE_LOCK: Lazy<tokio::sync::Mutex<()>> = Lazy::new(|| tokio::sync::Mutex::new(()));

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
});

pub(crate) async fn engine_guard() -> tokio::sync::MutexGuard<'static, ()> {
    Lazy::force(&TRACING);
    ENGINE_LOCK.lock().await
}

/// Poll until `condition` holds; panics after ~2 seconds. Used to observe
/// the dispatcher worker, which runs on its own task.
pub(crate) async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EngineOp {
    Init,
    Shutdown,
    PlaceCall(String),
    Answer(SessionHandle),
    Hangup(SessionHandle, u16),
    SendDtmf(SessionHandle, char),
    Hold(SessionHandle),
    Resume(SessionHandle),
}

struct FakeInner {
    sink: Option<CallbackSink>,
    next_session: u64,
    live: Vec<SessionHandle>,
    ops: Vec<EngineOp>,
    fail_init: bool,
    fail_place_call: bool,
}

/// A scripted engine: records every command it receives and emits
/// callbacks only when the test asks for them. `shutdown` closes every
/// live session, like a real engine draining its calls.
pub(crate) struct FakeEngine {
    inner: Mutex<FakeInner>,
}

impl FakeEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(FakeEngine {
            inner: Mutex::new(FakeInner {
                sink: None,
                next_session: 100,
                live: Vec::new(),
                ops: Vec::new(),
                fail_init: false,
                fail_place_call: false,
            }),
        })
    }

    pub(crate) fn failing_init() -> Arc<Self> {
        let engine = Self::new();
        engine.inner.lock().unwrap().fail_init = true;
        engine
    }

    pub(crate) fn refuse_dials(&self) {
        self.inner.lock().unwrap().fail_place_call = true;
    }

    pub(crate) fn ops(&self) -> Vec<EngineOp> {
        self.inner.lock().unwrap().ops.clone()
    }

    pub(crate) fn last_session(&self) -> SessionHandle {
        *self
            .inner
            .lock()
            .unwrap()
            .live
            .last()
            .expect("no live session")
    }

    fn sink(&self) -> CallbackSink {
        self.inner
            .lock()
            .unwrap()
            .sink
            .clone()
            .expect("engine not initialized")
    }

    pub(crate) fn emit_incoming(&self, peer: &str) -> SessionHandle {
        let session = {
            let mut inner = self.inner.lock().unwrap();
            let session = SessionHandle(inner.next_session);
            inner.next_session += 1;
            inner.live.push(session);
            session
        };
        self.sink().deliver(NativeCallback::IncomingCall {
            session,
            peer: peer.to_string(),
        });
        session
    }

    pub(crate) fn emit_progress(&self, session: SessionHandle, progress: SessionProgress) {
        self.sink()
            .deliver(NativeCallback::CallStateChanged { session, progress });
    }

    pub(crate) fn emit_media(&self, session: SessionHandle) {
        self.sink().deliver(NativeCallback::MediaEstablished { session });
    }

    pub(crate) fn emit_dtmf(&self, session: SessionHandle, digit: char) {
        self.sink().deliver(NativeCallback::DtmfReceived { session, digit });
    }

    pub(crate) fn emit_closed(&self, session: SessionHandle, code: u16, text: &str) {
        self.inner.lock().unwrap().live.retain(|s| *s != session);
        self.sink().deliver(NativeCallback::CallClosed {
            session,
            code,
            text: text.to_string(),
        });
    }

    pub(crate) fn emit_registration(&self, state: RegistrationState, detail: Option<&str>) {
        self.sink().deliver(NativeCallback::RegistrationChanged {
            state,
            detail: detail.map(str::to_string),
        });
    }
}

impl NativeEngine for FakeEngine {
    fn init(&self, _config: &BridgeConfig, sink: CallbackSink) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_init {
            return Err(EngineError::new("transport bind refused"));
        }
        inner.sink = Some(sink);
        inner.ops.push(EngineOp::Init);
        Ok(())
    }

    fn shutdown(&self) {
        let (sink, drained) = {
            let mut inner = self.inner.lock().unwrap();
            inner.ops.push(EngineOp::Shutdown);
            (inner.sink.clone(), std::mem::take(&mut inner.live))
        };
        if let Some(sink) = sink {
            for session in drained {
                sink.deliver(NativeCallback::CallClosed {
                    session,
                    code: 487,
                    text: "engine shutdown".to_string(),
                });
            }
        }
    }

    fn place_call(&self, peer: &str) -> Result<SessionHandle, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.ops.push(EngineOp::PlaceCall(peer.to_string()));
        if inner.fail_place_call {
            return Err(EngineError::new("address not routable"));
        }
        let session = SessionHandle(inner.next_session);
        inner.next_session += 1;
        inner.live.push(session);
        Ok(session)
    }

    fn answer(&self, session: SessionHandle) -> Result<(), EngineError> {
        self.inner.lock().unwrap().ops.push(EngineOp::Answer(session));
        Ok(())
    }

    fn hangup(&self, session: SessionHandle, code: u16) -> Result<(), EngineError> {
        self.inner
            .lock()
            .unwrap()
            .ops
            .push(EngineOp::Hangup(session, code));
        Ok(())
    }

    fn send_dtmf(&self, session: SessionHandle, digit: char) -> Result<(), EngineError> {
        self.inner
            .lock()
            .unwrap()
            .ops
            .push(EngineOp::SendDtmf(session, digit));
        Ok(())
    }

    fn hold(&self, session: SessionHandle) -> Result<(), EngineError> {
        self.inner.lock().unwrap().ops.push(EngineOp::Hold(session));
        Ok(())
    }

    fn resume(&self, session: SessionHandle) -> Result<(), EngineError> {
        self.inner.lock().unwrap().ops.push(EngineOp::Resume(session));
        Ok(())
    }
}
