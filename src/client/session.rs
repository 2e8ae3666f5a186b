// ABOUTME: Client-side RELP session: open handshake, windowed sends, ack tracking and reconnect
// ABOUTME: Maintains the unacked list so frames survive a broken session and are resent in order

use crate::auth::PermittedPeers;
use crate::command::{CmdState, Command, CommandStates};
use crate::config::{RECV_CHUNK_SIZE, SessionConfig};
use crate::engine::{EventSink, PROTOCOL_VERSION};
use crate::error::{ErrorCode, RelpError, RelpResult};
use crate::frame::{Frame, FrameParser, Txnr, next_txnr};
use crate::offers::{Offers, local_offers};
use crate::sendbuf::{RspAction, SendBuf};
use crate::session::SessionState;
use crate::transport::{self, Transport};
use rustls_pki_types::ServerName;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_rustls::TlsConnector;

/// An established (or establishable) client session.
///
/// All operations take `&mut self`; exclusive access is what keeps the
/// unacked list and the window state consistent with each other - the
/// list-length check and the state flip always happen within one borrow,
/// with no interleaving possible.
///
/// Delivery is at-least-once: frames whose response never arrived are resent
/// after a reconnect under fresh txnrs, so a peer that processed a frame but
/// whose ack was lost will see it twice. Embedders that cannot tolerate
/// duplicates must deduplicate on content.
pub struct RelpClient {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) config: SessionConfig,
    pub(crate) family: crate::config::ProtocolFamily,
    pub(crate) auto_retry: bool,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) commands: CommandStates,
    pub(crate) permitted: PermittedPeers,
    pub(crate) connector: Option<TlsConnector>,

    conn: Option<Conn>,
    state: SessionState,
    next_txnr: Txnr,
    /// Protocol version agreed with the server during open.
    session_version: u32,
    /// Sent frames whose rsp has not arrived yet, in send order.
    unacked: VecDeque<SendBuf>,
}

struct Conn {
    transport: Transport,
    parser: FrameParser,
}

impl RelpClient {
    pub(crate) fn new(
        host: String,
        port: u16,
        family: crate::config::ProtocolFamily,
        config: SessionConfig,
        auto_retry: bool,
        commands: CommandStates,
        permitted: PermittedPeers,
        connector: Option<TlsConnector>,
        events: Arc<dyn EventSink>,
    ) -> RelpClient {
        RelpClient {
            host,
            port,
            config,
            family,
            auto_retry,
            events,
            commands,
            permitted,
            connector,
            conn: None,
            state: SessionState::Disconnected,
            next_txnr: 1,
            session_version: PROTOCOL_VERSION,
            unacked: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of sent frames still awaiting their rsp. Never exceeds the
    /// configured window size.
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// Protocol version negotiated with the server.
    pub fn session_version(&self) -> u32 {
        self.session_version
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some() && !self.state.is_down()
    }

    /// Build the transport and run the open handshake.
    ///
    /// On return the session is `ReadyToSend`. Any command still `Required`
    /// after offer processing breaks the session with `RqdFeatMissing`.
    pub async fn connect(&mut self) -> RelpResult<()> {
        self.commands.fix_unset();

        let stream =
            transport::tcp_connect(&self.host, self.port, self.family, self.config.timeout).await?;
        transport::apply_keepalive(&stream, &self.config.keepalive);

        let transport = match &self.connector {
            Some(connector) => {
                let name = ServerName::try_from(self.host.clone()).map_err(|_| {
                    RelpError::InvalidParam(format!("invalid server name {:?}", self.host))
                })?;
                let handshake =
                    time::timeout(self.config.timeout, connector.connect(name, stream)).await;
                let tls = match handshake {
                    Ok(Ok(tls)) => tls,
                    Ok(Err(e)) => {
                        let err = RelpError::TlsHandshake(e.to_string());
                        self.events.on_error(
                            &self.host,
                            &err.to_string(),
                            ErrorCode::ErrTlsHands,
                        );
                        return Err(err);
                    }
                    Err(_) => {
                        return Err(RelpError::TlsHandshake("handshake timed out".into()));
                    }
                };
                Transport::Tls(Box::new(tls.into()))
            }
            None => Transport::Plain(stream),
        };

        crate::tls::authenticate_peer(
            &transport,
            self.config.tls.auth_mode,
            &self.permitted,
            &*self.events,
        )?;

        self.conn = Some(Conn {
            transport,
            parser: FrameParser::new(self.config.max_data_size),
        });
        self.next_txnr = 1;
        self.state = SessionState::PreInit;

        let offers = local_offers(PROTOCOL_VERSION, &self.commands);
        self.raw_send_command(Command::Open, offers.serialize().as_bytes(), RspAction::OpenAck)
            .await?;
        self.state = SessionState::InitCmdSent;
        self.wait_state(SessionState::InitRspRcvd, self.config.timeout)
            .await?;
        if self.state == SessionState::Broken {
            return Err(RelpError::SessionBroken);
        }

        // every command that survived negotiation is Enabled now; anything
        // still Required is a fatal feature mismatch
        if self.commands.required_missing() {
            self.state = SessionState::Broken;
            return Err(RelpError::RqdFeatMissing);
        }

        self.state = SessionState::ReadyToSend;
        tracing::debug!(host = %self.host, version = self.session_version, "session established");
        Ok(())
    }

    /// Send one syslog message and register it for ack tracking.
    pub async fn send_syslog(&mut self, msg: &[u8]) -> RelpResult<()> {
        if self.commands.syslog() != CmdState::Enabled {
            return Err(RelpError::CmdDisabled("syslog"));
        }
        self.send_command(Command::Syslog, msg, RspAction::None).await
    }

    /// Orderly shutdown: wait briefly for window space, send `close`, await
    /// the response. Repeated close on a closed session is a no-op signalled
    /// with `SessionClosed`.
    pub async fn disconnect(&mut self) -> RelpResult<()> {
        if self.conn.is_none() || self.state == SessionState::Disconnected {
            return Err(RelpError::SessionClosed);
        }

        if self.state != SessionState::Broken {
            // a bit more impatient than usual: if the window stays full we
            // still try to be polite and send the close request anyway
            let _ = self
                .wait_state(SessionState::ReadyToSend, Duration::from_secs(1))
                .await;
            if self.state != SessionState::Broken
                && self
                    .raw_send_command(Command::Close, b"", RspAction::CloseAck)
                    .await
                    .is_ok()
            {
                self.state = SessionState::CloseCmdSent;
                let _ = self
                    .wait_state(SessionState::CloseRspRcvd, self.config.timeout)
                    .await;
            }
        }

        if let Some(mut conn) = self.conn.take() {
            conn.transport.shutdown().await;
        }
        self.state = SessionState::Disconnected;
        Ok(())
    }

    /// The regular send path: waits until the session may admit the frame
    /// (which also services incoming responses, clearing window pressure),
    /// re-establishes a broken session when auto-retry is on, then sends.
    async fn send_command(
        &mut self,
        cmd: Command,
        data: &[u8],
        action: RspAction,
    ) -> RelpResult<()> {
        self.wait_state(SessionState::ReadyToSend, self.config.timeout)
            .await?;

        if self.auto_retry && self.state == SessionState::Broken {
            self.try_reestablish().await?;
        }
        if self.state == SessionState::Broken {
            return Err(RelpError::SessionBroken);
        }

        self.raw_send_command(cmd, data, action).await
    }

    /// Serialize, assign the next txnr, transmit fully and register on the
    /// unacked list. No window or state checks; session init depends on that.
    async fn raw_send_command(
        &mut self,
        cmd: Command,
        data: &[u8],
        action: RspAction,
    ) -> RelpResult<()> {
        let mut sendbuf = SendBuf::build(self.next_txnr, cmd, data, action)?;
        self.next_txnr = next_txnr(self.next_txnr);
        tracing::debug!(txnr = sendbuf.txnr(), %cmd, len = data.len(), "sending frame");

        let timeout = self.config.timeout;
        let conn = self.conn.as_mut().ok_or(RelpError::SessionBroken)?;
        if let Err(e) = conn.transport.send_all(&mut sendbuf, timeout).await {
            tracing::debug!(error = %e, "send failed, session broken");
            self.state = SessionState::Broken;
            return Err(RelpError::SessionBroken);
        }
        self.add_unacked(sendbuf);
        Ok(())
    }

    /// Block until the session reaches `expected` (or breaks), servicing the
    /// receive side the whole time so acks keep flowing. On timeout the
    /// session is flagged broken, exactly like an I/O failure, because the
    /// recovery action is the same.
    async fn wait_state(&mut self, expected: SessionState, timeout: Duration) -> RelpResult<()> {
        let deadline = time::Instant::now() + timeout;
        let mut chunk = vec![0u8; RECV_CHUNK_SIZE];

        while self.state != expected && self.state != SessionState::Broken {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            if remaining.is_zero() {
                self.state = SessionState::Broken;
                return Err(RelpError::TimedOut);
            }
            let Some(conn) = self.conn.as_mut() else {
                self.state = SessionState::Broken;
                return Err(RelpError::SessionBroken);
            };

            let mut frames = Vec::new();
            match time::timeout(remaining, conn.transport.recv(&mut chunk)).await {
                Err(_) => {
                    self.state = SessionState::Broken;
                    return Err(RelpError::TimedOut);
                }
                Ok(Err(e)) => {
                    self.state = SessionState::Broken;
                    return Err(e.into());
                }
                Ok(Ok(0)) => {
                    tracing::debug!("server closed the connection, session broken");
                    self.state = SessionState::Broken;
                }
                Ok(Ok(n)) => {
                    if let Err(e) = conn.parser.consume(&chunk[..n], &mut frames) {
                        self.state = SessionState::Broken;
                        return Err(e);
                    }
                }
            }

            for frame in frames {
                if let Err(e) = self.handle_frame(frame) {
                    if e.is_session_fatal() {
                        self.state = SessionState::Broken;
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Client-side dispatch: responses and the serverclose hint.
    fn handle_frame(&mut self, frame: Frame) -> RelpResult<()> {
        let cmd = Command::parse(&frame.cmd)?;
        match cmd {
            Command::Rsp => {
                let rsp = frame.parse_rsp()?;
                tracing::debug!(txnr = frame.txnr, code = rsp.code, "response received");
                // unknown txnr in a rsp means the session state diverged
                let sendbuf = self
                    .remove_unacked(frame.txnr)
                    .ok_or(RelpError::NotFound)?;
                if !rsp.is_ok() {
                    return Err(RelpError::RspStateErr {
                        code: rsp.code,
                        text: rsp.text,
                    });
                }
                match sendbuf.on_rsp() {
                    RspAction::OpenAck => self.process_open_rsp(&rsp),
                    RspAction::CloseAck => {
                        self.state = SessionState::CloseRspRcvd;
                        Ok(())
                    }
                    RspAction::None => Ok(()),
                }
            }
            Command::Serverclose => {
                tracing::debug!("server announced close, session broken");
                self.state = SessionState::Broken;
                Ok(())
            }
            other => Err(RelpError::InvalidCmd(other.as_str().to_string())),
        }
    }

    /// Process the offers the server sent back with its `200 OK`.
    fn process_open_rsp(&mut self, rsp: &crate::frame::Rsp) -> RelpResult<()> {
        let offers = Offers::parse(&rsp.body)?;
        let mut saw_version = false;

        for offer in offers.iter() {
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
                    if version as u32 > PROTOCOL_VERSION {
                        return Err(RelpError::IncompatOffers);
                    }
                    saw_version = true;
                    self.session_version = version as u32;
                }
                "commands" => {
                    for value in &offer.values {
                        let _ = self.commands.set(&value.text, CmdState::Enabled);
                        tracing::debug!(command = %value.text, "enabled by server offer");
                    }
                }
                "relp_software" => {
                    // informational only
                }
                other => {
                    tracing::debug!(offer = other, "ignoring unknown server offer");
                }
            }
        }

        if !saw_version {
            return Err(RelpError::InvalidOffer("server did not offer relp_version".into()));
        }
        self.state = SessionState::InitRspRcvd;
        Ok(())
    }

    /// Re-establish a broken session and resend every unacked frame, in
    /// original order, under fresh txnrs. Entries stay on the list until the
    /// rsp for their new txnr arrives.
    async fn try_reestablish(&mut self) -> RelpResult<()> {
        tracing::debug!(
            unacked = self.unacked.len(),
            "re-establishing broken session"
        );
        if let Some(mut conn) = self.conn.take() {
            conn.transport.shutdown().await;
        }

        // hold the old unacked entries aside; connect() tracks its own open
        // frame on the (now empty) list
        let mut pending = std::mem::take(&mut self.unacked);
        if let Err(e) = self.connect().await {
            self.unacked = pending;
            self.state = SessionState::Broken;
            return Err(e);
        }

        while let Some(mut sendbuf) = pending.pop_front() {
            let result = match sendbuf.rewrite_txnr(self.next_txnr) {
                Ok(()) => {
                    self.next_txnr = next_txnr(self.next_txnr);
                    tracing::debug!(txnr = sendbuf.txnr(), "resending unacked frame");
                    let timeout = self.config.timeout;
                    match self.conn.as_mut() {
                        Some(conn) => conn.transport.send_all(&mut sendbuf, timeout).await,
                        None => Err(RelpError::SessionBroken),
                    }
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => self.add_unacked(sendbuf),
                Err(e) => {
                    // keep this frame and everything not yet resent for the
                    // next recovery attempt, still in order
                    self.unacked.push_back(sendbuf);
                    self.unacked.append(&mut pending);
                    self.state = SessionState::Broken;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Admit a fully sent frame to the unacked list; hitting the window size
    /// blocks further admission. Session init sends exactly one frame at a
    /// time, so the window can never fill during init.
    fn add_unacked(&mut self, sendbuf: SendBuf) {
        self.unacked.push_back(sendbuf);
        if self.unacked.len() >= self.config.window_size {
            self.state = SessionState::WindowFull;
            if self.unacked.len() > self.config.window_size {
                tracing::warn!(
                    len = self.unacked.len(),
                    window = self.config.window_size,
                    "unacked list exceeds window size"
                );
            }
        }
    }

    /// Drop an acked frame from the list; leaving window-full restores send
    /// admission. List length and state flip stay within one exclusive
    /// borrow, so they can never disagree.
    fn remove_unacked(&mut self, txnr: Txnr) -> Option<SendBuf> {
        let pos = self.unacked.iter().position(|s| s.txnr() == txnr)?;
        let sendbuf = self.unacked.remove(pos);
        if self.unacked.len() < self.config.window_size
            && self.state == SessionState::WindowFull
        {
            self.state = SessionState::ReadyToSend;
        }
        sendbuf
    }
}
