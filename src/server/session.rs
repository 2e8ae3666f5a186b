// ABOUTME: Server-side session: receives frames, dispatches commands and answers with rsp frames
// ABOUTME: Enforces txnr sequencing, the open handshake gate and per-command enablement

use crate::command::{CmdState, Command, CommandStates};
use crate::config::RECV_CHUNK_SIZE;
use crate::error::{ErrorCode, RelpError, RelpResult};
use crate::frame::{Frame, FrameParser, Txnr, next_txnr};
use crate::offers::{Offers, local_offers};
use crate::sendbuf::{RspAction, SendBuf};
use crate::sendq::SendQueue;
use crate::server::listener::ListenerShared;
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time;

/// Cap for the text we copy into a non-200 response line.
const MAX_RSP_REASON: usize = 80;

/// One accepted connection, server side.
pub(crate) struct ServerSession {
    transport: Transport,
    parser: FrameParser,
    /// Next txnr we expect from the client; hint frames with txnr 0 do not
    /// advance it.
    expected_txnr: Txnr,
    /// Set once the open handshake completed; before that, `open` is the only
    /// acceptable command.
    opened: bool,
    closing: bool,
    commands: CommandStates,
    protocol_version: u32,
    sendq: SendQueue,
    hostname: String,
    ip: String,
    shared: Arc<ListenerShared>,
}

impl ServerSession {
    pub fn new(
        transport: Transport,
        hostname: String,
        ip: String,
        shared: Arc<ListenerShared>,
    ) -> ServerSession {
        ServerSession {
            transport,
            parser: FrameParser::new(shared.session.max_data_size),
            expected_txnr: 1,
            opened: false,
            closing: false,
            commands: shared.commands,
            protocol_version: shared.protocol_version,
            sendq: SendQueue::new(),
            hostname,
            ip,
            shared,
        }
    }

    /// Drive the session until the client closes, the engine stops, or a
    /// session-fatal error tears it down. Teardown initiated on our side
    /// (stop or error) is announced with the `serverclose` hint first.
    pub async fn run(&mut self, stop: watch::Receiver<bool>) -> RelpResult<()> {
        let result = self.run_loop(stop).await;
        if result.is_err() {
            // courtesy hint; the peer may be in no state to receive it
            self.send_serverclose_hint().await;
        }
        self.transport.shutdown().await;
        result
    }

    async fn run_loop(&mut self, mut stop: watch::Receiver<bool>) -> RelpResult<()> {
        let mut chunk = vec![0u8; RECV_CHUNK_SIZE];
        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        self.send_serverclose_hint().await;
                        return Ok(());
                    }
                }
                read = self.transport.recv(&mut chunk) => {
                    let n = read?;
                    if n == 0 {
                        tracing::debug!(peer = %self.ip, "client closed connection");
                        return Ok(());
                    }
                    let mut frames = Vec::new();
                    let parse_result = self.parser.consume(&chunk[..n], &mut frames);
                    // frames completed before a violation (in the grammar or
                    // at dispatch) still get their responses; the queue is
                    // flushed before the violation tears us down
                    let mut dispatch_result = Ok(());
                    for frame in frames {
                        if let Err(e) = self.handle_frame(frame).await {
                            dispatch_result = Err(e);
                            break;
                        }
                    }
                    self.flush_responses().await?;
                    dispatch_result?;
                    parse_result?;
                    if self.closing {
                        tracing::debug!(peer = %self.ip, "session closed by client request");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Drain pending responses, corking around multi-frame bursts.
    async fn flush_responses(&mut self) -> RelpResult<()> {
        if self.sendq.is_empty() {
            return Ok(());
        }
        let burst = self.sendq.len() > 1;
        if burst {
            self.transport.set_cork(true);
        }
        let result = self.transport.drain(&self.sendq).await;
        if burst {
            self.transport.set_cork(false);
        }
        result.map_err(RelpError::from)
    }

    async fn handle_frame(&mut self, frame: Frame) -> RelpResult<()> {
        if frame.txnr != 0 {
            if frame.txnr != self.expected_txnr {
                return Err(RelpError::InvalidTxnr {
                    got: frame.txnr,
                    expected: self.expected_txnr,
                });
            }
            self.expected_txnr = next_txnr(self.expected_txnr);
        }

        let cmd = Command::parse(&frame.cmd)?;
        tracing::debug!(txnr = frame.txnr, %cmd, "dispatching frame");

        if !self.opened && cmd != Command::Open {
            return Err(RelpError::InvalidCmd(frame.cmd));
        }

        match cmd {
            Command::Open => self.handle_open(&frame),
            Command::Close => {
                self.respond(frame.txnr, b"")?;
                self.closing = true;
                Ok(())
            }
            Command::Syslog => self.handle_syslog(&frame),
            // these flow server-to-client only
            Command::Rsp | Command::Serverclose => Err(RelpError::InvalidCmd(frame.cmd)),
        }
    }

    /// Process the client offers, select the compatible set and answer with
    /// `200 OK` plus our own offers. Feature state is frozen afterwards.
    fn handle_open(&mut self, frame: &Frame) -> RelpResult<()> {
        let client_offers = Offers::parse(&frame.data)?;
        let mut saw_version = false;

        for offer in client_offers.iter() {
            match offer.name.as_str() {
                "relp_version" => {
                    let version = offer
                        .first_int()
                        .ok_or_else(|| RelpError::InvalidOffer("relp_version without value".into()))?;
                    if version < 0 {
                        return Err(RelpError::InvalidOffer(
                            "relp_version is not a non-negative integer".into(),
                        ));
                    }
                    saw_version = true;
                    // pick the lesser of the peer's version and ours
                    self.protocol_version = (version as u32).min(self.shared.protocol_version);
                }
                "commands" => {
                    for value in &offer.values {
                        // unknown command names are simply not enabled
                        let _ = self.commands.set(&value.text, CmdState::Enabled);
                    }
                }
                "relp_software" => {
                    // informational only
                }
                other => {
                    tracing::debug!(offer = other, "ignoring unknown client offer");
                }
            }
        }

        if !saw_version {
            return Err(RelpError::InvalidOffer("client did not offer relp_version".into()));
        }

        self.commands.fix_unset();
        let offers = local_offers(self.protocol_version, &self.commands);
        let data = format!("200 OK\n{}", offers.serialize());
        self.respond(frame.txnr, data.as_bytes())?;
        self.opened = true;
        Ok(())
    }

    fn handle_syslog(&mut self, frame: &Frame) -> RelpResult<()> {
        if self.commands.syslog() != CmdState::Enabled {
            tracing::debug!(peer = %self.ip, "syslog command is disabled on this session");
            return self.respond(frame.txnr, b"500 command disabled");
        }

        match self
            .shared
            .events
            .on_syslog(&self.hostname, &self.ip, &frame.data)
        {
            Ok(()) => self.respond(frame.txnr, b"200 OK"),
            Err(reason) => {
                let reason: String = reason.chars().take(MAX_RSP_REASON).collect();
                self.respond(frame.txnr, format!("500 {reason}").as_bytes())
            }
        }
    }

    fn respond(&mut self, txnr: Txnr, data: &[u8]) -> RelpResult<()> {
        let sendbuf = SendBuf::build(txnr, Command::Rsp, data, RspAction::None)?;
        self.sendq.push_back(sendbuf);
        Ok(())
    }

    /// Best-effort `serverclose` hint ahead of server-initiated teardown.
    /// Loss of the hint is fine, the client notices on next use.
    async fn send_serverclose_hint(&mut self) {
        if !self.opened {
            return;
        }
        if let Ok(mut sendbuf) = SendBuf::build(0, Command::Serverclose, b"", RspAction::None) {
            let _ = self
                .transport
                .send_all(&mut sendbuf, time::Duration::from_secs(1))
                .await;
        }
    }
}

/// Accept-side wrapper: TLS handshake, peer auth, hostname resolution, then
/// the session loop. Reports session-fatal errors through the error callback.
pub(crate) async fn serve(
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    acceptor: Option<tokio_rustls::TlsAcceptor>,
    shared: Arc<ListenerShared>,
    stop: watch::Receiver<bool>,
) -> RelpResult<()> {
    crate::transport::apply_keepalive(&stream, &shared.session.keepalive);

    let transport = match &acceptor {
        Some(acceptor) => {
            let handshake = time::timeout(shared.session.timeout, acceptor.accept(stream)).await;
            match handshake {
                Ok(Ok(tls)) => Transport::Tls(Box::new(tls.into())),
                Ok(Err(e)) => {
                    let err = RelpError::TlsHandshake(e.to_string());
                    shared
                        .events
                        .on_error(&peer.to_string(), &err.to_string(), ErrorCode::ErrTlsHands);
                    return Err(err);
                }
                Err(_) => {
                    let err = RelpError::TlsHandshake("handshake timed out".into());
                    shared
                        .events
                        .on_error(&peer.to_string(), &err.to_string(), ErrorCode::ErrTlsHands);
                    return Err(err);
                }
            }
        }
        None => Transport::Plain(stream),
    };

    if let Err(e) = crate::tls::authenticate_peer(
        &transport,
        shared.session.tls.auth_mode,
        &shared.permitted,
        &*shared.events,
    ) {
        // the auth callback already fired with the credential material
        return Err(e);
    }

    let hostname = crate::transport::peer_hostname(peer.ip(), shared.dns_mode).await;
    let mut session = ServerSession::new(transport, hostname, peer.ip().to_string(), shared.clone());
    match session.run(stop).await {
        Ok(()) => Ok(()),
        Err(e) => {
            shared
                .events
                .on_error(&peer.to_string(), &e.to_string(), e.code());
            Err(e)
        }
    }
}
