// lib.rs - host-side bridge over a native SIP/VoIP call-control engine.
//
// The engine (SIP stack, RTP, codecs) is a black box behind the
// `NativeEngine` trait; this crate owns the single engine instance,
// turns its callbacks into one ordered event stream, maps native sessions
// to host-owned calls, and marshals host commands back into the engine.

mod bridge;
mod call;
mod core;
mod dispatcher;
mod engine;
mod events;
mod handle;
mod registry;

#[cfg(test)]
mod test_support;

// Re-export the host-facing surface
pub use crate::bridge::{Bridge, BridgeBuilder};
pub use crate::call::Call;
pub use crate::core::*;
pub use crate::engine::{
    CallbackSink, EngineError, NativeCallback, NativeEngine, SessionHandle, SessionProgress,
};
pub use crate::events::EventStream;

// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        AccountConfig,
        Bridge,
        BridgeBuilder,
        // Configuration
        BridgeConfig,
        // Errors
        BridgeError,
        Call,
        CallDirection,
        // IDs
        CallId,
        // States
        CallState,
        CloseReason,
        DtmfDigit,
        // Events
        Event,
        EventStream,
        MediaState,
        // Engine boundary
        NativeEngine,
        RegistrationState,
        Result,
        SessionHandle,
        SessionProgress,
        TransportConfig,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
