// Call structure: the host's view of one SIP session.
//
// Accessors reflect the last value applied by the event consumption path.
// Commands only request a change: they validate against the last known
// state, hand the request to the dispatcher and return as soon as the
// submission is accepted. The resulting state change, if any, arrives
// later as an event.
use std::sync::Arc;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::core::{
    BridgeError, CallDirection, CallId, CallState, DtmfDigit, MediaState, Result,
};
use crate::dispatcher::{CommandDispatcher, EngineCommand};
use crate::engine::{SessionHandle, SessionProgress};

pub struct Call {
    id: CallId,
    direction: CallDirection,
    peer: String,
    created_at: DateTime<Utc>,
    state: RwLock<CallState>,
    media_state: RwLock<MediaState>,
    // Borrowed reference into the engine; None for an outbound call whose
    // session has not been placed yet, invalid after the closed event.
    session: RwLock<Option<SessionHandle>>,
    dispatcher: CommandDispatcher,
}

impl Call {
    pub(crate) fn new(
        id: CallId,
        direction: CallDirection,
        peer: String,
        initial: CallState,
        session: Option<SessionHandle>,
        dispatcher: CommandDispatcher,
    ) -> Arc<Self> {
        Arc::new(Call {
            id,
            direction,
            peer,
            created_at: Utc::now(),
            state: RwLock::new(initial),
            media_state: RwLock::new(MediaState::None),
            session: RwLock::new(session),
            dispatcher,
        })
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> CallState {
        *self.state.read().unwrap()
    }

    pub fn media_state(&self) -> MediaState {
        *self.media_state.read().unwrap()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Accept an incoming call. Valid only while the call is `Incoming`;
    /// the transition to `Established` arrives as a later event.
    pub async fn answer(&self) -> Result<()> {
        match self.state() {
            CallState::Closed => Err(BridgeError::CallAlreadyClosed(self.id)),
            CallState::Incoming => {
                self.dispatcher
                    .submit(EngineCommand::Answer { call_id: self.id })
                    .await
            }
            state => Err(BridgeError::InvalidStateTransition { command: "answer", state }),
        }
    }

    /// Request termination with the engine's opaque reason code. A no-op,
    /// not an error, if the call is already Terminating or Closed; the
    /// call counts as ended only once its closed event arrives.
    pub async fn hangup(&self, code: u16) -> Result<()> {
        match self.state() {
            CallState::Closed | CallState::Terminating => Ok(()),
            _ => {
                self.dispatcher
                    .submit(EngineCommand::Hangup { call_id: self.id, code })
                    .await
            }
        }
    }

    /// Send a DTMF digit in-band. The digit is validated before anything
    /// is submitted; outside `Established` nothing reaches the engine.
    pub async fn send_dtmf(&self, digit: char) -> Result<()> {
        let digit = DtmfDigit::new(digit)?;
        match self.state() {
            CallState::Closed => Err(BridgeError::CallAlreadyClosed(self.id)),
            CallState::Established => {
                self.dispatcher
                    .submit(EngineCommand::SendDtmf {
                        call_id: self.id,
                        digit: digit.as_char(),
                    })
                    .await
            }
            _ => Err(BridgeError::NotEstablished(self.id)),
        }
    }

    pub async fn hold(&self) -> Result<()> {
        match self.state() {
            CallState::Closed => Err(BridgeError::CallAlreadyClosed(self.id)),
            CallState::Established => {
                self.dispatcher
                    .submit(EngineCommand::Hold { call_id: self.id })
                    .await
            }
            state => Err(BridgeError::InvalidStateTransition { command: "hold", state }),
        }
    }

    pub async fn resume(&self) -> Result<()> {
        match self.state() {
            CallState::Closed => Err(BridgeError::CallAlreadyClosed(self.id)),
            CallState::Held => {
                self.dispatcher
                    .submit(EngineCommand::Resume { call_id: self.id })
                    .await
            }
            state => Err(BridgeError::InvalidStateTransition { command: "resume", state }),
        }
    }

    pub(crate) fn session(&self) -> Option<SessionHandle> {
        *self.session.read().unwrap()
    }

    pub(crate) fn bind_session(&self, session: SessionHandle) {
        *self.session.write().unwrap() = Some(session);
    }

    // Applied only by the event consumption path, one event at a time.
    // Panics on a transition the engine may not legally report.
    pub(crate) fn apply_progress(&self, progress: SessionProgress) -> CallState {
        let next = match progress {
            SessionProgress::Dialing => CallState::Dialing,
            SessionProgress::Ringing => CallState::Ringing,
            SessionProgress::EarlyMedia => CallState::EarlyMedia,
            SessionProgress::Established => CallState::Established,
            SessionProgress::Held => CallState::Held,
            SessionProgress::Terminating => CallState::Terminating,
        };

        {
            let mut state = self.state.write().unwrap();
            if !state.can_progress_to(next) {
                panic!("engine moved {} from {:?} to {:?}", self.id, *state, next);
            }
            *state = next;
        }

        // Media negotiation is underway once early media or the answer is
        // reported, until the engine confirms it established.
        if matches!(next, CallState::EarlyMedia | CallState::Established) {
            let mut media = self.media_state.write().unwrap();
            if *media == MediaState::None {
                *media = MediaState::Negotiating;
            }
        }
        next
    }

    pub(crate) fn apply_media_established(&self) {
        *self.media_state.write().unwrap() = MediaState::Established;
    }

    pub(crate) fn apply_closed(&self) {
        *self.state.write().unwrap() = CallState::Closed;
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("media_state", &self.media_state())
            .finish()
    }
}
