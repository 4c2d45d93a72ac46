// The call registry: the sole owner of the CallId <-> native session
// mapping. All creations, bindings and removals go through one critical
// section, which is what makes create-or-resolve atomic under concurrent
// inbound events.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::call::Call;
use crate::core::{BridgeError, CallDirection, CallId, CallState, Result};
use crate::dispatcher::CommandDispatcher;
use crate::engine::{EngineError, SessionHandle};

// Process-wide so ids stay unique across bridge instances.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

struct RegistryInner {
    by_id: HashMap<CallId, Arc<Call>>,
    by_session: HashMap<SessionHandle, CallId>,
}

pub struct CallRegistry {
    inner: Mutex<RegistryInner>,
    dispatcher: CommandDispatcher,
}

impl CallRegistry {
    pub(crate) fn new(dispatcher: CommandDispatcher) -> Arc<Self> {
        Arc::new(CallRegistry {
            inner: Mutex::new(RegistryInner {
                by_id: HashMap::new(),
                by_session: HashMap::new(),
            }),
            dispatcher,
        })
    }

    fn mint_id() -> CallId {
        CallId(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Return the call for a native session, creating it if this is the
    /// first time the session is observed. Called only from the event
    /// consumption path.
    pub(crate) fn resolve_or_create(
        &self,
        session: SessionHandle,
        direction: CallDirection,
        peer: &str,
    ) -> Arc<Call> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.by_session.get(&session) {
            return inner.by_id[id].clone();
        }

        let id = Self::mint_id();
        let initial = match direction {
            CallDirection::Inbound => CallState::Incoming,
            CallDirection::Outbound => CallState::Dialing,
        };
        let call = Call::new(
            id,
            direction,
            peer.to_string(),
            initial,
            Some(session),
            self.dispatcher.clone(),
        );
        inner.by_id.insert(id, call.clone());
        inner.by_session.insert(session, id);
        debug!(call = %id, %session, ?direction, "call created");
        call
    }

    /// Register an outbound call before its native session exists, so the
    /// first event the engine emits for it can already resolve.
    pub(crate) fn register_outbound(&self, peer: &str) -> Arc<Call> {
        let id = Self::mint_id();
        let call = Call::new(
            id,
            CallDirection::Outbound,
            peer.to_string(),
            CallState::Dialing,
            None,
            self.dispatcher.clone(),
        );
        self.inner.lock().unwrap().by_id.insert(id, call.clone());
        debug!(call = %id, peer, "outbound call registered");
        call
    }

    /// Run `place` and bind the session it returns, all under the registry
    /// lock. An event arriving for the new session resolves through this
    /// same lock, so it can never observe the session unbound.
    pub(crate) fn bind_outbound(
        &self,
        id: CallId,
        place: impl FnOnce() -> std::result::Result<SessionHandle, EngineError>,
    ) -> std::result::Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        let session = place()?;
        match inner.by_id.get(&id) {
            Some(call) => {
                call.bind_session(session);
                inner.by_session.insert(session, id);
                debug!(call = %id, %session, "outbound session bound");
            }
            None => warn!(call = %id, %session, "call vanished before its session bound"),
        }
        Ok(())
    }

    pub fn lookup(&self, id: CallId) -> Result<Arc<Call>> {
        self.inner
            .lock()
            .unwrap()
            .by_id
            .get(&id)
            .cloned()
            .ok_or(BridgeError::NoSuchCall(id))
    }

    pub(crate) fn by_session(&self, session: SessionHandle) -> Option<Arc<Call>> {
        let inner = self.inner.lock().unwrap();
        let id = inner.by_session.get(&session)?;
        inner.by_id.get(id).cloned()
    }

    pub(crate) fn session_for(&self, id: CallId) -> Option<SessionHandle> {
        self.inner
            .lock()
            .unwrap()
            .by_id
            .get(&id)
            .and_then(|call| call.session())
    }

    /// Drop the call from both maps. Invoked only on observing a closed
    /// event; returns the call exactly once.
    pub(crate) fn remove(&self, id: CallId) -> Option<Arc<Call>> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner.by_id.remove(&id)?;
        if let Some(session) = call.session() {
            inner.by_session.remove(&session);
        }
        debug!(call = %id, "call removed");
        Some(call)
    }

    pub(crate) fn live_calls(&self) -> Vec<Arc<Call>> {
        self.inner.lock().unwrap().by_id.values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().by_id.len()
    }
}
