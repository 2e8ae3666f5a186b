// ABOUTME: Transport layer for RELP sessions: TCP with optional TLS on top
// ABOUTME: Handles connect with family bias, keep-alive tuning, cork hints and partial-write sends

use crate::config::{DnsLookupMode, KeepaliveConfig, ProtocolFamily};
use crate::error::{RelpError, RelpResult};
use crate::sendbuf::SendBuf;
use crate::sendq::SendQueue;
use rustls_pki_types::CertificateDer;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::time;
use tokio_rustls::TlsStream;

/// A session's byte pipe: plain TCP or TLS over TCP.
///
/// Only two operations matter beyond setup and teardown: `recv` and `send`,
/// both of which may transfer fewer bytes than asked. TLS rehandshake retries
/// are handled inside the tokio-rustls stream; callers simply await.
#[derive(Debug)]
pub enum Transport {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Read whatever is available, up to `buf.len()` octets. Zero means the
    /// peer closed the connection.
    pub async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf).await,
            Transport::Tls(s) => s.read(buf).await,
        }
    }

    /// Write as much of `buf` as the transport accepts right now.
    pub async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf).await,
            Transport::Tls(s) => s.write(buf).await,
        }
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush().await,
            Transport::Tls(s) => s.flush().await,
        }
    }

    /// Orderly shutdown of the write side; errors are of no further interest
    /// during teardown.
    pub async fn shutdown(&mut self) {
        let _ = match self {
            Transport::Plain(s) => s.shutdown().await,
            Transport::Tls(s) => s.shutdown().await,
        };
    }

    /// The underlying TCP stream, for socket-level options.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => s.get_ref().0,
        }
    }

    pub fn peer_addr(&self) -> RelpResult<SocketAddr> {
        self.tcp().peer_addr().map_err(|_| RelpError::AddrUnknown)
    }

    /// The peer's end-entity certificate, if this is a TLS transport and the
    /// peer presented one.
    pub fn peer_cert(&self) -> Option<CertificateDer<'static>> {
        match self {
            Transport::Plain(_) => None,
            Transport::Tls(s) => s
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .map(|c| c.clone().into_owned()),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Transmit a whole serialized frame, resuming partial writes, bounded by
    /// `timeout`. On timeout the cursor stays where it was so the caller can
    /// decide whether the session survives.
    pub async fn send_all(&mut self, sendbuf: &mut SendBuf, timeout: Duration) -> RelpResult<()> {
        let deadline = time::Instant::now() + timeout;
        while !sendbuf.is_done() {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            if remaining.is_zero() {
                return Err(RelpError::TimedOut);
            }
            let n = time::timeout(remaining, self.send(sendbuf.unsent()))
                .await
                .map_err(|_| RelpError::TimedOut)??;
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "peer gone").into());
            }
            sendbuf.advance(n);
        }
        self.flush().await?;
        Ok(())
    }

    /// Drain the session's send queue until it is empty. A partially written
    /// buffer goes back to the queue head so frames are never interleaved.
    pub async fn drain(&mut self, queue: &SendQueue) -> io::Result<()> {
        while let Some(mut sendbuf) = queue.pop_front() {
            while !sendbuf.is_done() {
                match self.send(sendbuf.unsent()).await {
                    Ok(0) => {
                        queue.push_front(sendbuf);
                        return Err(io::Error::new(io::ErrorKind::WriteZero, "peer gone"));
                    }
                    Ok(n) => sendbuf.advance(n),
                    Err(e) => {
                        queue.push_front(sendbuf);
                        return Err(e);
                    }
                }
            }
        }
        self.flush().await
    }

    /// Best-effort no-push hint around a known burst of frames. Never affects
    /// correctness.
    pub fn set_cork(&self, on: bool) {
        set_cork(self.tcp(), on);
    }
}

/// Dial a RELP peer, trying every resolved address the family bias allows.
pub async fn tcp_connect(
    host: &str,
    port: u16,
    family: ProtocolFamily,
    timeout: Duration,
) -> RelpResult<TcpStream> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|_| RelpError::AddrUnknown)?
        .filter(|a| family.accepts(a))
        .collect();
    if addrs.is_empty() {
        return Err(RelpError::AddrUnknown);
    }

    let mut last_err = RelpError::AddrUnknown;
    for addr in addrs {
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                tracing::debug!(%addr, error = %e, "connect attempt failed");
                last_err = e.into();
            }
            Err(_) => {
                tracing::debug!(%addr, "connect attempt timed out");
                last_err = RelpError::TimedOut;
            }
        }
    }
    Err(last_err)
}

/// Apply TCP keep-alive tuning. Missing OS support is a warning, not an
/// error; the session works without it.
pub fn apply_keepalive(stream: &TcpStream, cfg: &KeepaliveConfig) {
    if !cfg.enabled {
        return;
    }
    let sock = SockRef::from(stream);
    #[allow(unused_mut)]
    let mut keepalive = TcpKeepalive::new()
        .with_time(cfg.idle)
        .with_interval(cfg.interval);
    #[cfg(all(
        unix,
        not(any(target_os = "openbsd", target_os = "redox", target_os = "solaris"))
    ))]
    {
        keepalive = keepalive.with_retries(cfg.probes);
    }
    #[cfg(not(all(
        unix,
        not(any(target_os = "openbsd", target_os = "redox", target_os = "solaris"))
    )))]
    {
        tracing::warn!(
            probes = cfg.probes,
            "keep-alive probe count not supported on this platform"
        );
    }
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        tracing::warn!(error = %e, "could not enable TCP keep-alive");
    }
}

/// TCP_CORK-style burst hint; a no-op where the OS has nothing comparable.
pub fn set_cork(stream: &TcpStream, on: bool) {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
    {
        if let Err(e) = SockRef::from(stream).set_cork(on) {
            tracing::debug!(on, error = %e, "cork hint not applied");
        }
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
    {
        let _ = (stream, on);
    }
}

/// Resolve the hostname to report for a peer address.
pub async fn peer_hostname(ip: IpAddr, mode: DnsLookupMode) -> String {
    match mode {
        DnsLookupMode::Off => ip.to_string(),
        DnsLookupMode::On => tokio::task::spawn_blocking(move || {
            dns_lookup::lookup_addr(&ip).unwrap_or_else(|_| ip.to_string())
        })
        .await
        .unwrap_or_else(|_| ip.to_string()),
    }
}
