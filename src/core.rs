// Core types shared across the bridge: identifiers, states, events,
// configuration and the error taxonomy.
use std::fmt;
use std::path::PathBuf;

// Bridge-assigned call identifier. Minted once per call, never reused
// while any host reference may still exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallDirection {
    Inbound,
    Outbound,
}

// Call states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallState {
    Incoming,
    Dialing,
    Ringing,
    EarlyMedia,
    Established,
    Held,
    Terminating,
    Closed,
}

impl CallState {
    pub fn is_closed(&self) -> bool {
        matches!(self, CallState::Closed)
    }

    /// Whether the engine may legally move a call from `self` to `next`.
    /// Closed is reachable only through an explicit closed event, which
    /// does not go through this check.
    pub(crate) fn can_progress_to(self, next: CallState) -> bool {
        use CallState::*;
        if self == next {
            // Engines occasionally repeat a state report; treated as a no-op.
            return !matches!(self, Closed);
        }
        match (self, next) {
            (Incoming | Dialing, Ringing | EarlyMedia | Established | Terminating) => true,
            (Ringing, EarlyMedia | Established | Terminating) => true,
            (EarlyMedia, Established | Terminating) => true,
            (Established, Held | Terminating) => true,
            (Held, Established | Terminating) => true,
            _ => false,
        }
    }
}

// Media states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MediaState {
    None,
    Negotiating,
    Established,
}

// Registration states, as computed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegistrationState {
    Registered,
    Unregistered,
    Failed,
}

/// A validated DTMF digit: 0-9, *, # or A-D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DtmfDigit(char);

impl DtmfDigit {
    pub fn new(digit: char) -> Result<Self> {
        let upper = digit.to_ascii_uppercase();
        match upper {
            '0'..='9' | '*' | '#' | 'A'..='D' => Ok(DtmfDigit(upper)),
            _ => Err(BridgeError::InvalidDigit(digit)),
        }
    }

    pub fn as_char(&self) -> char {
        self.0
    }
}

impl fmt::Display for DtmfDigit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a call ended. The code and text come from the engine and are passed
/// through verbatim; the bridge never reinterprets them. Code 0 marks a
/// closure synthesized by the bridge itself (e.g. a dial the engine
/// refused before a session existed).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CloseReason {
    pub code: u16,
    pub text: String,
}

impl CloseReason {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        CloseReason { code, text: text.into() }
    }

    pub(crate) fn local(text: impl Into<String>) -> Self {
        CloseReason { code: 0, text: text.into() }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{} {}", self.code, self.text)
        }
    }
}

// Host-visible events, one per native callback, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Event {
    RegistrationChanged {
        state: RegistrationState,
        detail: Option<String>,
    },
    IncomingCall {
        call_id: CallId,
        peer: String,
    },
    CallProgress {
        call_id: CallId,
        state: CallState,
    },
    MediaEstablished {
        call_id: CallId,
    },
    DtmfReceived {
        call_id: CallId,
        digit: DtmfDigit,
    },
    CallClosed {
        call_id: CallId,
        reason: CloseReason,
    },
}

impl Event {
    /// The call this event pertains to, if any.
    pub fn call_id(&self) -> Option<CallId> {
        match self {
            Event::RegistrationChanged { .. } => None,
            Event::IncomingCall { call_id, .. }
            | Event::CallProgress { call_id, .. }
            | Event::MediaEstablished { call_id }
            | Event::DtmfReceived { call_id, .. }
            | Event::CallClosed { call_id, .. } => Some(*call_id),
        }
    }
}

// Configuration types
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BridgeConfig {
    pub user_agent: String,
    pub account: AccountConfig,
    pub transport: TransportConfig,
    /// Engine configuration directory, interpreted by the engine.
    pub config_path: Option<PathBuf>,
    /// Announcement/ringtone search path, interpreted by the engine.
    pub audio_path: Option<PathBuf>,
    /// Ask the engine to trace SIP messages.
    pub sip_trace: bool,
    /// Soft capacity of the event queue before the overflow policy kicks in.
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            user_agent: format!("sipbridge/{}", env!("CARGO_PKG_VERSION")),
            account: AccountConfig::default(),
            transport: TransportConfig::default(),
            config_path: None,
            audio_path: None,
            sip_trace: false,
            event_capacity: 256,
        }
    }
}

#[cfg(feature = "serialization")]
impl BridgeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::EngineInit(format!("bad config: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| BridgeError::EngineInit(format!("config not serializable: {}", e)))
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AccountConfig {
    pub display_name: String,
    pub username: String,
    pub domain: String,
    pub password: Option<String>,
    pub registrar: Option<String>,
    pub expire_seconds: u32,
}

impl AccountConfig {
    /// Address-of-record for this account.
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }
}

impl Default for AccountConfig {
    fn default() -> Self {
        AccountConfig {
            display_name: String::new(),
            username: "anonymous".to_string(),
            domain: "localhost".to_string(),
            password: None,
            registrar: None,
            expire_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransportConfig {
    pub local_address: String,
    pub enable_tcp: bool,
    pub enable_tls: bool,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub tls_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            local_address: "0.0.0.0".to_string(),
            enable_tcp: false,
            enable_tls: false,
            udp_port: 5060,
            tcp_port: 5060,
            tls_port: 5061,
        }
    }
}

// Error taxonomy
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    /// The engine could not be initialized (bad or unavailable transport
    /// configuration, config rejected, engine handle already spent).
    #[error("engine init failed: {0}")]
    EngineInit(String),

    /// A second engine was started while one is active in this process.
    #[error("an engine is already running in this process")]
    AlreadyRunning,

    /// A command was issued while the engine is stopping or stopped.
    #[error("engine is not running")]
    EngineNotRunning,

    /// The call id is unknown (never existed, or already removed).
    #[error("no such call: {0}")]
    NoSuchCall(CallId),

    /// The call ended; the underlying session is gone.
    #[error("{0} is already closed")]
    CallAlreadyClosed(CallId),

    /// The command is not valid in the call's current state.
    #[error("{command} not valid in state {state:?}")]
    InvalidStateTransition {
        command: &'static str,
        state: CallState,
    },

    /// DTMF requires an established call.
    #[error("{0} is not established")]
    NotEstablished(CallId),

    /// Digit outside 0-9, *, #, A-D.
    #[error("invalid DTMF digit {0:?}")]
    InvalidDigit(char),

    /// `events()` was already called; the stream is handed out once.
    #[error("event stream already consumed")]
    EventStreamConsumed,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dtmf_accepts_the_full_keypad() {
        for c in "0123456789*#ABCD".chars() {
            assert_eq!(DtmfDigit::new(c).unwrap().as_char(), c);
        }
        // Lowercase letters are normalized.
        assert_eq!(DtmfDigit::new('b').unwrap().as_char(), 'B');
    }

    #[test]
    fn dtmf_rejects_everything_else() {
        for c in "eEfz !+-".chars() {
            assert_eq!(DtmfDigit::new(c), Err(BridgeError::InvalidDigit(c)));
        }
    }

    #[test]
    fn call_state_progressions() {
        use CallState::*;
        assert!(Dialing.can_progress_to(Ringing));
        assert!(Dialing.can_progress_to(Established));
        assert!(Incoming.can_progress_to(EarlyMedia));
        assert!(Ringing.can_progress_to(EarlyMedia));
        assert!(EarlyMedia.can_progress_to(Established));
        assert!(Established.can_progress_to(Held));
        assert!(Held.can_progress_to(Established));
        assert!(Established.can_progress_to(Terminating));

        // Repeated reports are tolerated.
        assert!(Ringing.can_progress_to(Ringing));

        // No going backwards, no skipping to Closed without a closed event.
        assert!(!Established.can_progress_to(Ringing));
        assert!(!Held.can_progress_to(Ringing));
        assert!(!Terminating.can_progress_to(Established));
        assert!(!Established.can_progress_to(Closed));
        assert!(!Closed.can_progress_to(Closed));
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(CloseReason::new(486, "Busy Here").to_string(), "486 Busy Here");
        assert_eq!(CloseReason::new(487, "").to_string(), "487");
        assert_eq!(CloseReason::local("engine stopped").code, 0);
    }

    #[test]
    fn account_aor() {
        let account = AccountConfig {
            username: "alice".to_string(),
            domain: "example.com".to_string(),
            ..AccountConfig::default()
        };
        assert_eq!(account.aor(), "sip:alice@example.com");
    }

    #[test]
    fn default_config_is_sane() {
        let config = BridgeConfig::default();
        assert_eq!(config.transport.udp_port, 5060);
        assert!(config.event_capacity > 0);
        assert!(!config.sip_trace);
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn config_json_round_trip() {
        let config = BridgeConfig::default();
        let json = config.to_json().unwrap();
        let back = BridgeConfig::from_json(&json).unwrap();
        assert_eq!(back.transport.udp_port, config.transport.udp_port);
        assert_eq!(back.account.domain, config.account.domain);
    }
}
