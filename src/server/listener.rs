// ABOUTME: Server-side accepting socket set: one logical listener, possibly multiple bound sockets
// ABOUTME: Handles wildcard/dual-family binds, TLS acceptor setup and per-listener session defaults

use crate::auth::PermittedPeers;
use crate::command::CommandStates;
use crate::config::{DEFAULT_PORT, DnsLookupMode, ProtocolFamily, SessionConfig};
use crate::engine::EventSink;
use crate::error::{RelpError, RelpResult};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Configuration of one logical listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub port: u16,
    /// Explicit bind address; `None` binds the wildcard address(es) the
    /// engine's protocol family allows.
    pub bind_addr: Option<IpAddr>,
    pub session: SessionConfig,
    /// Per-listener command policy; falls back to the engine default.
    pub commands: Option<CommandStates>,
}

impl ListenerConfig {
    pub fn new(port: u16) -> Self {
        ListenerConfig {
            port,
            bind_addr: None,
            session: SessionConfig::default(),
            commands: None,
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

/// State shared by every session accepted from one listener.
pub(crate) struct ListenerShared {
    pub session: SessionConfig,
    pub commands: CommandStates,
    pub permitted: PermittedPeers,
    pub dns_mode: DnsLookupMode,
    pub protocol_version: u32,
    pub events: Arc<dyn EventSink>,
}

/// A listener with its sockets bound and TLS material loaded.
pub(crate) struct BoundListener {
    pub sockets: Vec<TcpListener>,
    pub acceptor: Option<TlsAcceptor>,
    pub shared: Arc<ListenerShared>,
}

impl BoundListener {
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.sockets
            .iter()
            .filter_map(|s| s.local_addr().ok())
            .collect()
    }
}

/// Bind one socket, non-blocking, with v6-only set so a dual-family wildcard
/// listener can own both address families without clashing.
fn bind_socket(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;
    TcpListener::from_std(socket.into())
}

pub(crate) async fn bind(
    config: &ListenerConfig,
    family: ProtocolFamily,
    dns_mode: DnsLookupMode,
    default_commands: CommandStates,
    protocol_version: u32,
    events: Arc<dyn EventSink>,
) -> RelpResult<BoundListener> {
    let addrs: Vec<SocketAddr> = match config.bind_addr {
        Some(ip) => vec![SocketAddr::new(ip, config.port)],
        None => match family {
            ProtocolFamily::V4 => vec![SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port)],
            ProtocolFamily::V6 => vec![SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), config.port)],
            ProtocolFamily::Any => vec![
                SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port),
                SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), config.port),
            ],
        },
    };

    let mut sockets = Vec::new();
    let mut last_err = None;
    for addr in addrs {
        match bind_socket(addr) {
            Ok(listener) => {
                tracing::debug!(%addr, "listener bound");
                sockets.push(listener);
            }
            Err(e) => {
                tracing::warn!(%addr, error = %e, "could not bind listener socket");
                last_err = Some(e);
            }
        }
    }
    if sockets.is_empty() {
        let detail = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no usable address".into());
        return Err(RelpError::CouldNotBind(detail));
    }

    let acceptor = if config.session.tls.enabled {
        Some(crate::tls::build_acceptor(&config.session.tls)?)
    } else {
        None
    };
    let permitted = PermittedPeers::compile(&config.session.tls.permitted_peers)?;

    Ok(BoundListener {
        sockets,
        acceptor,
        shared: Arc::new(ListenerShared {
            session: config.session.clone(),
            commands: config.commands.unwrap_or(default_commands),
            permitted,
            dns_mode,
            protocol_version,
            events,
        }),
    })
}
