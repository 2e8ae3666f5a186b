// ABOUTME: Configuration knobs shared by client and server sessions
// ABOUTME: Covers window/timeout/data limits, address-family bias, TLS and keep-alive tuning

use std::path::PathBuf;
use std::time::Duration;

/// IANA-registered default RELP port.
pub const DEFAULT_PORT: u16 = 20514;

/// Default cap on outstanding unacked frames per client session.
pub const DEFAULT_WINDOW_SIZE: usize = 128;

/// Default upper bound on blocking waits.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Default frame-level data cap. 128 KiB is sufficient for any sane syslog
/// payload while bounding what a peer can make us allocate.
pub const DEFAULT_MAX_DATA_SIZE: usize = 128 * 1024;

/// Size of a single transport read. Framing spans reads, so this only tunes
/// syscall granularity, not the maximum frame size.
pub const RECV_CHUNK_SIZE: usize = 32 * 1024;

/// Default DH parameter strength requested for anonymous TLS.
pub const DEFAULT_DH_BITS: u32 = 1024;

/// Address-family bias for binding and connecting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProtocolFamily {
    V4,
    V6,
    #[default]
    Any,
}

impl ProtocolFamily {
    pub fn accepts(self, addr: &std::net::SocketAddr) -> bool {
        match self {
            ProtocolFamily::V4 => addr.is_ipv4(),
            ProtocolFamily::V6 => addr.is_ipv6(),
            ProtocolFamily::Any => true,
        }
    }
}

/// Whether to resolve peer IP addresses back to hostnames.
///
/// With lookups off the peer hostname is simply its IP literal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DnsLookupMode {
    #[default]
    Off,
    On,
}

/// Post-handshake peer check performed on TLS sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// TLS without certificate authentication.
    #[default]
    None,
    /// Exact match of the peer certificate's SHA-1 fingerprint against the
    /// permitted-peers list.
    Fingerprint,
    /// Chain validation plus SAN-DNSName/CN matching against the
    /// permitted-peers list (which may contain wildcards).
    Name,
}

/// TCP keep-alive tuning. Absence of an OS-level option downgrades to a
/// warning, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    /// Number of unanswered probes before the connection is dropped.
    pub probes: u32,
    /// Idle time before the first probe.
    pub idle: Duration,
    /// Interval between probes.
    pub interval: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            enabled: false,
            probes: 9,
            idle: Duration::from_secs(7200),
            interval: Duration::from_secs(75),
        }
    }
}

/// Everything TLS: enablement, suite hints, credentials and peer policy.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    pub enabled: bool,
    /// Request compression in the TLS suite. The rustls backend does not
    /// negotiate compression; the knob is accepted and logged.
    pub compress: bool,
    /// DH strength for anonymous TLS. Inert under rustls, which manages its
    /// own key exchange; kept so configurations carry over unchanged.
    pub dh_bits: Option<u32>,
    pub auth_mode: AuthMode,
    /// Priority-string override. Not interpreted by the rustls backend.
    pub priority: Option<String>,
    pub ca_cert_file: Option<PathBuf>,
    pub own_cert_file: Option<PathBuf>,
    pub priv_key_file: Option<PathBuf>,
    /// Fingerprints (`SHA1:..`) or DN/SAN name patterns, possibly wildcarded.
    pub permitted_peers: Vec<String>,
}

/// Per-session tunables shared by both connection roles.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Max outstanding unacked frames; values below 2 are ignored.
    pub window_size: usize,
    /// Upper bound on blocking waits (handshake, window space, close).
    pub timeout: Duration,
    /// Frame-level data cap enforced by the receive parser.
    pub max_data_size: usize,
    pub keepalive: KeepaliveConfig,
    pub tls: TlsSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            timeout: DEFAULT_TIMEOUT,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            keepalive: KeepaliveConfig::default(),
            tls: TlsSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Window sizes of 0 or 1 would deadlock the ack pipeline, so they are
    /// rejected the way the reference implementation rejects them: silently
    /// keeping the previous value.
    pub fn set_window_size(&mut self, size: usize) {
        if size > 1 {
            self.window_size = size;
        }
    }
}
