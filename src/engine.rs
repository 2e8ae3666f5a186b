//! The engine is the root object of the server side: it owns the listener
//! set, tracks the sessions spawned from them and carries the callback
//! surface exposed to embedders.
//!
//! The readiness bookkeeping of the original reactor design is delegated to
//! the tokio runtime: every listener socket runs an accept loop, every
//! accepted connection runs as its own session task, and all of them watch a
//! shared stop flag. Stopping is cooperative; sessions send the unsolicited
//! `serverclose` hint before closing their transport.

use crate::command::{CmdState, CommandStates};
use crate::config::{DnsLookupMode, ProtocolFamily};
use crate::error::{ErrorCode, RelpResult};
use crate::server::listener::{BoundListener, ListenerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Protocol version this implementation speaks.
pub const PROTOCOL_VERSION: u32 = 0;

/// Callback surface exposed to embedders.
///
/// All callbacks may be invoked from any session task, so implementations
/// must be `Send + Sync`. The default implementations do nothing (and accept
/// every syslog frame).
pub trait EventSink: Send + Sync + 'static {
    /// Invoked for each successfully received `syslog` frame on a server
    /// session. Returning an error makes the server answer with a non-200
    /// response carrying the message.
    fn on_syslog(&self, hostname: &str, ip: &str, msg: &[u8]) -> Result<(), String> {
        let _ = (hostname, ip, msg);
        Ok(())
    }

    /// TLS peer-authentication failure: credential material plus a
    /// human-readable reason.
    fn on_auth_error(&self, auth_data: &str, message: &str, code: ErrorCode) {
        let _ = (auth_data, message, code);
    }

    /// Per-session errors.
    fn on_error(&self, object: &str, message: &str, code: ErrorCode) {
        let _ = (object, message, code);
    }

    /// Engine-level errors with no session context.
    fn on_generic_error(&self, object: &str, message: &str, code: ErrorCode) {
        let _ = (object, message, code);
    }
}

/// Sink that drops every event.
#[derive(Debug, Default)]
pub struct NullEvents;

impl EventSink for NullEvents {}

/// Cloneable handle for stopping a running engine from another task.
#[derive(Clone)]
pub struct StopHandle(Arc<watch::Sender<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.0.send(true);
    }
}

/// Root object owning listeners, sessions and engine-wide defaults.
///
/// Process-wide state is confined to the instance (TLS library init aside,
/// which happens once per process); multiple engines may coexist.
pub struct Engine {
    protocol_version: u32,
    dns_mode: DnsLookupMode,
    family: ProtocolFamily,
    default_commands: CommandStates,
    events: Arc<dyn EventSink>,
    listeners: Vec<ListenerConfig>,
    bound: Vec<BoundListener>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Engine {
        let (stop_tx, stop_rx) = watch::channel(false);
        Engine {
            protocol_version: PROTOCOL_VERSION,
            dns_mode: DnsLookupMode::default(),
            family: ProtocolFamily::default(),
            default_commands: CommandStates::new(),
            events: Arc::new(NullEvents),
            listeners: Vec::new(),
            bound: Vec::new(),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn set_dns_lookup_mode(&mut self, mode: DnsLookupMode) -> &mut Self {
        self.dns_mode = mode;
        self
    }

    pub fn set_protocol_family(&mut self, family: ProtocolFamily) -> &mut Self {
        self.family = family;
        self
    }

    pub fn set_events(&mut self, events: Arc<dyn EventSink>) -> &mut Self {
        self.events = events;
        self
    }

    /// Default per-command policy inherited by new sessions. `Forbidden` is
    /// sticky here exactly as it is on sessions.
    pub fn set_command_state(&mut self, cmd: &str, state: CmdState) -> RelpResult<&mut Self> {
        self.default_commands.set(cmd, state)?;
        Ok(self)
    }

    pub fn add_listener(&mut self, config: ListenerConfig) -> &mut Self {
        self.listeners.push(config);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_tx.clone())
    }

    /// Bind every configured listener and report the bound addresses (useful
    /// with ephemeral ports). Called implicitly by [`Engine::run`] if needed.
    pub async fn bind(&mut self) -> RelpResult<Vec<SocketAddr>> {
        let mut addrs = Vec::new();
        for config in &self.listeners {
            let bound = crate::server::listener::bind(
                config,
                self.family,
                self.dns_mode,
                self.default_commands,
                self.protocol_version,
                self.events.clone(),
            )
            .await;
            match bound {
                Ok(bound) => {
                    addrs.extend(bound.local_addrs());
                    self.bound.push(bound);
                }
                Err(e) => {
                    self.events.on_generic_error("listener", &e.to_string(), e.code());
                    return Err(e);
                }
            }
        }
        self.listeners.clear();
        Ok(addrs)
    }

    /// Drive every listener and session until the stop flag is set.
    ///
    /// Engine-fatal conditions (bind failures, TLS setup failures) surface
    /// through the generic-error callback and a non-OK return; the engine
    /// never auto-recovers them.
    pub async fn run(&mut self) -> RelpResult<()> {
        if !self.listeners.is_empty() {
            self.bind().await?;
        }

        let mut tasks = JoinSet::new();
        for listener in self.bound.drain(..) {
            let BoundListener {
                sockets,
                acceptor,
                shared,
            } = listener;
            for socket in sockets {
                let shared = shared.clone();
                let acceptor = acceptor.clone();
                let stop = self.stop_rx.clone();
                tasks.spawn(crate::server::accept_loop(socket, acceptor, shared, stop));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                self.events
                    .on_generic_error("engine", &format!("listener task failed: {e}"), ErrorCode::IoErr);
            }
        }
        Ok(())
    }

    /// Request a cooperative stop; the run loop exits at the next iteration
    /// boundary and sessions are torn down.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
