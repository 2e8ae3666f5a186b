// ABOUTME: Client factory and builder for RELP client sessions
// ABOUTME: Collects connection knobs, compiles peer patterns and TLS config, then connects

use crate::auth::PermittedPeers;
use crate::client::session::RelpClient;
use crate::command::{CmdState, CommandStates};
use crate::config::{DEFAULT_PORT, KeepaliveConfig, ProtocolFamily, SessionConfig, TlsSettings};
use crate::engine::{EventSink, NullEvents};
use crate::error::RelpResult;
use std::sync::Arc;
use std::time::Duration;

/// Builder for [`RelpClient`].
///
/// A fresh builder has `syslog` marked `Desired`, so plain log shipping works
/// out of the box; use [`command_state`](ClientBuilder::command_state) with
/// `Required` when the caller cannot operate without it, or `Forbidden` to
/// lock it out.
pub struct ClientBuilder {
    host: String,
    port: u16,
    family: ProtocolFamily,
    config: SessionConfig,
    auto_retry: bool,
    commands: CommandStates,
    events: Arc<dyn EventSink>,
}

impl ClientBuilder {
    pub fn new(host: impl Into<String>) -> ClientBuilder {
        let mut commands = CommandStates::new();
        // sending syslog is the whole point of most clients
        commands
            .set("syslog", CmdState::Desired)
            .expect("syslog is a negotiable command");
        ClientBuilder {
            host: host.into(),
            port: DEFAULT_PORT,
            family: ProtocolFamily::default(),
            config: SessionConfig::default(),
            auto_retry: false,
            commands,
            events: Arc::new(NullEvents),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn protocol_family(mut self, family: ProtocolFamily) -> Self {
        self.family = family;
        self
    }

    /// Max outstanding unacked frames. Values below 2 keep the default.
    pub fn window_size(mut self, size: usize) -> Self {
        self.config.set_window_size(size);
        self
    }

    /// Upper bound for blocking waits (handshake, window space, close).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_data_size(mut self, bytes: usize) -> Self {
        self.config.max_data_size = bytes;
        self
    }

    /// Re-establish a broken session automatically on the next send,
    /// resending unacked frames. Implies at-least-once delivery.
    pub fn auto_retry(mut self, enabled: bool) -> Self {
        self.auto_retry = enabled;
        self
    }

    pub fn keepalive(mut self, keepalive: KeepaliveConfig) -> Self {
        self.config.keepalive = keepalive;
        self
    }

    pub fn tls(mut self, tls: TlsSettings) -> Self {
        self.config.tls = tls;
        self
    }

    /// Per-command policy. `Forbidden` is sticky once set.
    pub fn command_state(mut self, cmd: &str, state: CmdState) -> RelpResult<Self> {
        self.commands.set(cmd, state)?;
        Ok(self)
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Compile the configuration and run the connect sequence.
    pub async fn connect(self) -> RelpResult<RelpClient> {
        let permitted = PermittedPeers::compile(&self.config.tls.permitted_peers)?;
        let connector = if self.config.tls.enabled {
            Some(crate::tls::build_connector(&self.config.tls)?)
        } else {
            None
        };

        let mut client = RelpClient::new(
            self.host,
            self.port,
            self.family,
            self.config,
            self.auto_retry,
            self.commands,
            permitted,
            connector,
            self.events,
        );
        client.connect().await?;
        Ok(client)
    }

    /// Quick client creation with defaults: plain TCP, default port, syslog
    /// desired.
    pub async fn quick(host: impl Into<String>) -> RelpResult<RelpClient> {
        ClientBuilder::new(host).connect().await
    }
}
