// The bridge façade: the single entry point the host uses. Wires the
// engine handle, call registry, event channel and command dispatcher
// together and exposes start/stop, dialing, the event stream and call
// lookup.
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::call::Call;
use crate::core::{BridgeConfig, BridgeError, CallId, Result};
use crate::dispatcher::{CommandDispatcher, EngineCommand};
use crate::engine::{CallbackSink, NativeEngine};
use crate::events::{EventQueue, EventStream};
use crate::handle::EngineHandle;
use crate::registry::CallRegistry;

pub struct Bridge {
    config: BridgeConfig,
    handle: EngineHandle,
    registry: Arc<CallRegistry>,
    dispatcher: CommandDispatcher,
    queue: Arc<EventQueue>,
    stream: Mutex<Option<EventStream>>,
    command_rx: Mutex<Option<mpsc::Receiver<EngineCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

// Bridge builder
pub struct BridgeBuilder {
    config: BridgeConfig,
    engine: Arc<dyn NativeEngine>,
}

impl BridgeBuilder {
    pub fn new(engine: Arc<dyn NativeEngine>) -> Self {
        BridgeBuilder {
            config: BridgeConfig::default(),
            engine,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn user_agent(mut self, user_agent: &str) -> Self {
        self.config.user_agent = user_agent.to_string();
        self
    }

    pub fn account(mut self, account: crate::core::AccountConfig) -> Self {
        self.config.account = account;
        self
    }

    pub fn local_address(mut self, address: &str) -> Self {
        self.config.transport.local_address = address.to_string();
        self
    }

    pub fn udp_port(mut self, port: u16) -> Self {
        self.config.transport.udp_port = port;
        self
    }

    pub fn config_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    pub fn audio_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.config.audio_path = Some(path.into());
        self
    }

    pub fn sip_trace(mut self, enabled: bool) -> Self {
        self.config.sip_trace = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn build(self) -> Arc<Bridge> {
        let queue = EventQueue::new(self.config.event_capacity);
        let (dispatcher, command_rx) = CommandDispatcher::new();
        let registry = CallRegistry::new(dispatcher.clone());
        let stream = EventStream::new(queue.clone(), registry.clone());

        Arc::new(Bridge {
            config: self.config,
            handle: EngineHandle::new(self.engine),
            registry,
            dispatcher,
            queue,
            stream: Mutex::new(Some(stream)),
            command_rx: Mutex::new(Some(command_rx)),
            worker: Mutex::new(None),
        })
    }
}

impl Bridge {
    pub fn builder(engine: Arc<dyn NativeEngine>) -> BridgeBuilder {
        BridgeBuilder::new(engine)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Initialize the native engine and begin accepting commands and
    /// emitting events. Fails with `AlreadyRunning` if any engine is
    /// active in this process, `EngineInit` if the engine rejects the
    /// configuration.
    #[instrument(name = "bridge_start", skip(self))]
    pub async fn start(&self) -> Result<()> {
        let sink = CallbackSink::new(self.queue.clone());
        self.handle.start(&self.config, sink)?;

        let command_rx = self
            .command_rx
            .lock()
            .unwrap()
            .take()
            .expect("command channel present until first start");
        let worker = self.dispatcher.spawn_worker(
            command_rx,
            self.handle.engine(),
            self.registry.clone(),
            self.queue.clone(),
        );
        *self.worker.lock().unwrap() = Some(worker);
        self.dispatcher.mark_running();

        info!(user_agent = %self.config.user_agent, "bridge started");
        Ok(())
    }

    /// Gracefully shut the engine down: live calls are terminated first,
    /// then the engine quiesces and the event channel closes. Blocks until
    /// the engine reported every live session closed. Idempotent; safe to
    /// call from any state and from any call's command path, but not from
    /// inside the event consumption loop.
    #[instrument(name = "bridge_stop", skip(self))]
    pub async fn stop(&self) -> Result<()> {
        if !self.handle.begin_stop() {
            return Ok(());
        }

        // New submissions fail fast from here on; whatever is already
        // queued is drained without reaching the engine.
        self.dispatcher.shut_down();
        self.dispatcher.submit_shutdown().await;
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }

        // Engine-driven teardown of whatever is still live.
        let engine = self.handle.engine();
        for call in self.registry.live_calls() {
            if let Some(session) = call.session() {
                debug!(call = %call.id(), %session, "hanging up for shutdown");
                if let Err(error) = engine.hangup(session, 0) {
                    warn!(call = %call.id(), %error, "shutdown hangup rejected");
                }
            }
        }

        // Blocks until every live session has emitted its closed callback
        // and the engine threads are joined.
        let engine = self.handle.engine();
        let _ = tokio::task::spawn_blocking(move || engine.shutdown()).await;

        self.queue.close();
        self.handle.finish_stop();
        Ok(())
    }

    /// Place an outgoing call. The returned call starts in `Dialing` and
    /// is registered before the native session exists, so the engine's
    /// first event for it already resolves. Progress, including failure,
    /// arrives on the event stream.
    pub async fn dial(&self, peer: &str) -> Result<Arc<Call>> {
        if !self.handle.is_running() {
            return Err(BridgeError::EngineNotRunning);
        }

        let call = self.registry.register_outbound(peer);
        debug!(call = %call.id(), peer, "dialing");

        let submitted = self
            .dispatcher
            .submit(EngineCommand::PlaceCall {
                call_id: call.id(),
                peer: peer.to_string(),
            })
            .await;
        match submitted {
            Ok(()) => Ok(call),
            Err(error) => {
                // Shutdown raced the submission; undo the registration.
                self.registry.remove(call.id());
                Err(error)
            }
        }
    }

    /// Hand out the event stream. The stream exists once per bridge; a
    /// second call fails with `EventStreamConsumed`.
    pub fn events(&self) -> Result<EventStream> {
        self.stream
            .lock()
            .unwrap()
            .take()
            .ok_or(BridgeError::EventStreamConsumed)
    }

    /// Look up a live call by id. Fails with `NoSuchCall` once the call's
    /// closed event has been consumed.
    pub fn call(&self, id: CallId) -> Result<Arc<Call>> {
        self.registry.lookup(id)
    }
}
