//! Integration tests exercising client and server over loopback connections,
//! including the reconnect/resend and window-pressure scenarios.

use crate::client::ClientBuilder;
use crate::command::CmdState;
use crate::config::{ProtocolFamily, TlsSettings};
use crate::engine::{Engine, EventSink, StopHandle};
use crate::error::{ErrorCode, RelpError};
use crate::frame::{Frame, FrameParser};
use crate::server::ListenerConfig;
use crate::session::SessionState;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Event sink that records everything for later assertions.
#[derive(Default)]
struct Collector {
    msgs: Mutex<Vec<(String, String, Vec<u8>)>>,
    errors: Mutex<Vec<(String, ErrorCode)>>,
    auth_errors: Mutex<Vec<(String, ErrorCode)>>,
}

impl EventSink for Collector {
    fn on_syslog(&self, hostname: &str, ip: &str, msg: &[u8]) -> Result<(), String> {
        self.msgs
            .lock()
            .unwrap()
            .push((hostname.to_string(), ip.to_string(), msg.to_vec()));
        Ok(())
    }

    fn on_auth_error(&self, auth_data: &str, _message: &str, code: ErrorCode) {
        self.auth_errors
            .lock()
            .unwrap()
            .push((auth_data.to_string(), code));
    }

    fn on_error(&self, _object: &str, message: &str, code: ErrorCode) {
        self.errors.lock().unwrap().push((message.to_string(), code));
    }

    fn on_generic_error(&self, _object: &str, message: &str, code: ErrorCode) {
        self.errors.lock().unwrap().push((message.to_string(), code));
    }
}

impl Collector {
    fn messages(&self) -> Vec<(String, String, Vec<u8>)> {
        self.msgs.lock().unwrap().clone()
    }

    fn error_codes(&self) -> Vec<ErrorCode> {
        self.errors.lock().unwrap().iter().map(|(_, c)| *c).collect()
    }
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// Spin up an engine with one ephemeral-port listener.
async fn start_engine(
    syslog_state: Option<CmdState>,
    tls: Option<TlsSettings>,
    events: Arc<Collector>,
) -> (SocketAddr, StopHandle, JoinHandle<crate::RelpResult<()>>) {
    init_tracing();
    let mut engine = Engine::new();
    engine.set_protocol_family(ProtocolFamily::V4);
    engine.set_events(events);
    if let Some(state) = syslog_state {
        engine.set_command_state("syslog", state).unwrap();
    }
    let mut listener = ListenerConfig::new(0);
    if let Some(tls) = tls {
        listener.session.tls = tls;
    }
    engine.add_listener(listener);

    let addrs = engine.bind().await.unwrap();
    let stop = engine.stop_handle();
    let handle = tokio::spawn(async move { engine.run().await });
    (addrs[0], stop, handle)
}

/// A hand-driven peer speaking raw RELP frames, for byte-level scenarios and
/// scripted server behavior.
struct TestPeer {
    stream: TcpStream,
    parser: FrameParser,
    pending: VecDeque<Frame>,
}

impl TestPeer {
    fn new(stream: TcpStream) -> TestPeer {
        TestPeer {
            stream,
            parser: FrameParser::new(128 * 1024),
            pending: VecDeque::new(),
        }
    }

    async fn connect(addr: SocketAddr) -> TestPeer {
        TestPeer::new(TcpStream::connect(addr).await.unwrap())
    }

    async fn write(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn read_frame(&mut self) -> Frame {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return frame;
            }
            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed while a frame was expected");
            let mut frames = Vec::new();
            self.parser.consume(&buf[..n], &mut frames).unwrap();
            self.pending.extend(frames);
        }
    }

    /// Read until the peer closes; panics on protocol data that arrives
    /// after the expected close.
    async fn expect_eof(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    let mut frames = Vec::new();
                    self.parser.consume(&buf[..n], &mut frames).unwrap();
                    assert!(frames.is_empty(), "unexpected frames before close: {frames:?}");
                }
            }
        }
    }

    /// Client role: send a well-formed open and expect the 200 response.
    async fn open(&mut self) {
        let offers = "relp_version=0\ncommands=syslog\nrelp_software=librelp,1.2.14,librelp";
        self.write(format!("1 open {} {}\n", offers.len(), offers).as_bytes())
            .await;
        let rsp = self.read_frame().await;
        assert_eq!(rsp.txnr, 1);
        assert_eq!(rsp.cmd, "rsp");
        let parsed = rsp.parse_rsp().unwrap();
        assert_eq!(parsed.code, 200);
    }

    /// Server role: accept an open command and answer it.
    async fn accept_open(&mut self) {
        let open = self.read_frame().await;
        assert_eq!(open.cmd, "open");
        assert_eq!(open.txnr, 1);
        let body = "200 OK\nrelp_version=0\ncommands=syslog\nrelp_software=peer,0.0,peer";
        self.write(format!("1 rsp {} {}\n", body.len(), body).as_bytes())
            .await;
    }

    /// Server role: ack a data frame.
    async fn ack(&mut self, txnr: u32) {
        self.write(format!("{txnr} rsp 6 200 OK\n").as_bytes()).await;
    }

    /// Server role: answer a close command with the empty rsp.
    async fn ack_close(&mut self, txnr: u32) {
        self.write(format!("{txnr} rsp 0\n").as_bytes()).await;
    }
}

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn happy_path_single_syslog() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events.clone()).await;

        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .timeout(Duration::from_secs(5))
            .connect()
            .await
            .unwrap();
        assert_eq!(client.state(), SessionState::ReadyToSend);
        assert_eq!(client.session_version(), 0);

        client.send_syslog(b"hello world").await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), SessionState::Disconnected);

        // the engine delivered exactly one message with the peer's identity
        let msgs = events.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].0, "127.0.0.1");
        assert_eq!(msgs[0].1, "127.0.0.1");
        assert_eq!(msgs[0].2, b"hello world");

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events).await;

        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .connect()
            .await
            .unwrap();
        client.disconnect().await.unwrap();
        assert!(matches!(
            client.disconnect().await,
            Err(RelpError::SessionClosed)
        ));

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn required_feature_missing_breaks_connect() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) =
            start_engine(Some(CmdState::Forbidden), None, events).await;

        let result = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .command_state("syslog", CmdState::Required)
            .unwrap()
            .connect()
            .await;
        assert!(matches!(result, Err(RelpError::RqdFeatMissing)));

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn client_side_forbidden_is_sticky_through_negotiation() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events).await;

        // the server offers syslog, but the client forbade it locally
        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .command_state("syslog", CmdState::Forbidden)
            .unwrap()
            .connect()
            .await
            .unwrap();
        assert!(matches!(
            client.send_syslog(b"nope").await,
            Err(RelpError::CmdDisabled("syslog"))
        ));
        client.disconnect().await.unwrap();

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn engine_stop_sends_serverclose_hint() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events).await;

        let mut peer = TestPeer::connect(addr).await;
        peer.open().await;

        stop.stop();
        let hint = peer.read_frame().await;
        assert_eq!(hint.txnr, 0);
        assert_eq!(hint.cmd, "serverclose");
        assert!(hint.data.is_empty());
        peer.expect_eof().await;

        engine.await.unwrap().unwrap();
    }
}

mod wire_scenarios {
    use super::*;

    #[tokio::test]
    async fn open_negotiates_offers() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events).await;

        let mut peer = TestPeer::connect(addr).await;
        let offers = "relp_version=0\ncommands=syslog\nrelp_software=librelp,1.2.14,librelp";
        peer.write(format!("1 open {} {}\n", offers.len(), offers).as_bytes())
            .await;

        let rsp = peer.read_frame().await;
        assert_eq!(rsp.txnr, 1);
        assert_eq!(rsp.cmd, "rsp");
        let parsed = rsp.parse_rsp().unwrap();
        assert_eq!(parsed.code, 200);
        assert_eq!(parsed.text, "OK");
        let body = String::from_utf8(parsed.body.to_vec()).unwrap();
        assert!(body.starts_with("relp_version=0\ncommands=syslog\nrelp_software="));

        // negotiated session carries messages and answers each txnr in turn
        peer.write(b"2 syslog 11 hello world\n").await;
        let rsp = peer.read_frame().await;
        assert_eq!(rsp.txnr, 2);
        assert_eq!(rsp.parse_rsp().unwrap().code, 200);

        peer.write(b"3 close 0\n").await;
        let rsp = peer.read_frame().await;
        assert_eq!(rsp.txnr, 3);
        assert!(rsp.data.is_empty());
        peer.expect_eof().await;

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn disabled_command_gets_500_and_session_survives() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) =
            start_engine(Some(CmdState::Forbidden), None, events.clone()).await;

        let mut peer = TestPeer::connect(addr).await;
        peer.open().await;

        peer.write(b"2 syslog 5 hello\n").await;
        let rsp = peer.read_frame().await;
        assert_eq!(rsp.txnr, 2);
        assert_eq!(rsp.data.as_ref(), b"500 command disabled");

        // the session is still alive: close completes normally
        peer.write(b"3 close 0\n").await;
        let rsp = peer.read_frame().await;
        assert_eq!(rsp.txnr, 3);
        assert!(events.messages().is_empty());

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn frame_grammar_violation_tears_down_session() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events.clone()).await;

        let mut peer = TestPeer::connect(addr).await;
        peer.open().await;

        // datalen says 2, data is "hi", but the trailer octet is not LF
        peer.write(b"2 syslog 2 hiX").await;
        // teardown is announced with the unsolicited hint, then the
        // connection closes
        let hint = peer.read_frame().await;
        assert_eq!((hint.txnr, hint.cmd.as_str()), (0, "serverclose"));
        peer.expect_eof().await;

        assert!(
            events.error_codes().contains(&ErrorCode::InvalidFrame),
            "expected InvalidFrame in {:?}",
            events.error_codes()
        );

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn out_of_sequence_txnr_aborts_session() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events.clone()).await;

        let mut peer = TestPeer::connect(addr).await;
        peer.open().await;

        peer.write(b"7 syslog 2 hi\n").await;
        let hint = peer.read_frame().await;
        assert_eq!((hint.txnr, hint.cmd.as_str()), (0, "serverclose"));
        peer.expect_eof().await;

        assert!(events.error_codes().contains(&ErrorCode::InvalidTxnr));

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn pipelined_ack_is_flushed_before_error_teardown() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events.clone()).await;

        let mut peer = TestPeer::connect(addr).await;
        // a valid open and an out-of-sequence frame arrive in one segment;
        // the ack for the open must still go out before the teardown
        let offers = "relp_version=0\ncommands=syslog\nrelp_software=librelp,1.2.14,librelp";
        peer.write(format!("1 open {} {}\n9 syslog 2 hi\n", offers.len(), offers).as_bytes())
            .await;

        let rsp = peer.read_frame().await;
        assert_eq!(rsp.txnr, 1);
        assert_eq!(rsp.parse_rsp().unwrap().code, 200);

        let hint = peer.read_frame().await;
        assert_eq!((hint.txnr, hint.cmd.as_str()), (0, "serverclose"));
        peer.expect_eof().await;

        assert!(events.error_codes().contains(&ErrorCode::InvalidTxnr));

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn first_frame_must_be_open() {
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, None, events.clone()).await;

        let mut peer = TestPeer::connect(addr).await;
        peer.write(b"1 syslog 2 hi\n").await;
        peer.expect_eof().await;

        assert!(events.error_codes().contains(&ErrorCode::InvalidCmd));

        stop.stop();
        engine.await.unwrap().unwrap();
    }
}

mod window_and_reconnect {
    use super::*;

    #[tokio::test]
    async fn window_full_blocks_until_acks_arrive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = TestPeer::new(stream);
            peer.accept_open().await;

            let f2 = peer.read_frame().await;
            assert_eq!((f2.txnr, f2.data.as_ref()), (2, &b"one"[..]));
            let f3 = peer.read_frame().await;
            assert_eq!((f3.txnr, f3.data.as_ref()), (3, &b"two"[..]));

            // hold the acks back long enough for the client to sit in
            // window-full, then release the window
            sleep(Duration::from_millis(200)).await;
            peer.ack(2).await;
            peer.ack(3).await;

            let f4 = peer.read_frame().await;
            assert_eq!((f4.txnr, f4.data.as_ref()), (4, &b"three"[..]));
            peer.ack(4).await;

            let close = peer.read_frame().await;
            assert_eq!(close.cmd, "close");
            peer.ack_close(close.txnr).await;
            peer.expect_eof().await;
        });

        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .window_size(2)
            .timeout(Duration::from_secs(5))
            .connect()
            .await
            .unwrap();

        client.send_syslog(b"one").await.unwrap();
        client.send_syslog(b"two").await.unwrap();
        assert_eq!(client.state(), SessionState::WindowFull);
        assert_eq!(client.unacked_len(), 2);

        // admission blocked until the held-back acks clear the window
        client.send_syslog(b"three").await.unwrap();
        assert!(client.unacked_len() <= 2);

        client.disconnect().await.unwrap();
        assert_eq!(client.unacked_len(), 0);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn reconnect_resends_unacked_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            // first connection: ack only the first message, then die with
            // two frames outstanding
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = TestPeer::new(stream);
            peer.accept_open().await;
            let f2 = peer.read_frame().await;
            assert_eq!((f2.txnr, f2.data.as_ref()), (2, &b"one"[..]));
            peer.ack(2).await;
            let f3 = peer.read_frame().await;
            assert_eq!((f3.txnr, f3.data.as_ref()), (3, &b"two"[..]));
            let f4 = peer.read_frame().await;
            assert_eq!((f4.txnr, f4.data.as_ref()), (4, &b"three"[..]));
            drop(peer);

            // second connection: the unacked frames arrive again, in their
            // original order, renumbered from the fresh session's txnrs
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = TestPeer::new(stream);
            peer.accept_open().await;
            let r2 = peer.read_frame().await;
            assert_eq!((r2.txnr, r2.data.as_ref()), (2, &b"two"[..]));
            peer.ack(2).await;
            let r3 = peer.read_frame().await;
            assert_eq!((r3.txnr, r3.data.as_ref()), (3, &b"three"[..]));
            peer.ack(3).await;
            let r4 = peer.read_frame().await;
            assert_eq!((r4.txnr, r4.data.as_ref()), (4, &b"four"[..]));
            peer.ack(4).await;

            let close = peer.read_frame().await;
            assert_eq!(close.cmd, "close");
            peer.ack_close(close.txnr).await;
            peer.expect_eof().await;
        });

        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .window_size(2)
            .timeout(Duration::from_secs(5))
            .auto_retry(true)
            .connect()
            .await
            .unwrap();

        client.send_syslog(b"one").await.unwrap();
        client.send_syslog(b"two").await.unwrap();
        // window full; this send first clears the window by reading the ack
        // for "one", then transmits
        client.send_syslog(b"three").await.unwrap();
        assert_eq!(client.unacked_len(), 2);

        // the server is gone now; the wait for window space notices the
        // close, re-establishes and resends "two"/"three" before "four"
        client.send_syslog(b"four").await.unwrap();
        assert_eq!(client.unacked_len(), 3);

        client.disconnect().await.unwrap();
        assert_eq!(client.unacked_len(), 0);
        assert_eq!(client.state(), SessionState::Disconnected);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn serverclose_hint_breaks_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = TestPeer::new(stream);
            peer.accept_open().await;
            let _ = peer.read_frame().await;
            let _ = peer.read_frame().await;
            // announce teardown instead of acking
            peer.write(b"0 serverclose 0\n").await;
            // keep the socket open so the client reacts to the hint, not to
            // a close
            sleep(Duration::from_secs(2)).await;
        });

        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .window_size(2)
            .timeout(Duration::from_secs(5))
            .connect()
            .await
            .unwrap();

        client.send_syslog(b"one").await.unwrap();
        client.send_syslog(b"two").await.unwrap();
        // blocked on window space, the client reads the hint instead
        assert!(matches!(
            client.send_syslog(b"three").await,
            Err(RelpError::SessionBroken)
        ));
        assert_eq!(client.state(), SessionState::Broken);
        server.await.unwrap();
    }
}

mod tls_sessions {
    use super::*;
    use crate::auth::sha1_fingerprint;
    use crate::config::AuthMode;
    use std::io::Write as _;

    struct TestCert {
        fingerprint: String,
        cert_path: std::path::PathBuf,
        key_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn generate_cert(names: &[&str]) -> TestCert {
        let certified = rcgen::generate_simple_self_signed(
            names.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.pem");
        let key_path = dir.path().join("key.pem");
        std::fs::File::create(&cert_path)
            .unwrap()
            .write_all(certified.cert.pem().as_bytes())
            .unwrap();
        std::fs::File::create(&key_path)
            .unwrap()
            .write_all(certified.key_pair.serialize_pem().as_bytes())
            .unwrap();
        TestCert {
            fingerprint: sha1_fingerprint(certified.cert.der().as_ref()),
            cert_path,
            key_path,
            _dir: dir,
        }
    }

    fn server_tls(cert: &TestCert) -> TlsSettings {
        TlsSettings {
            enabled: true,
            own_cert_file: Some(cert.cert_path.clone()),
            priv_key_file: Some(cert.key_path.clone()),
            ..TlsSettings::default()
        }
    }

    #[tokio::test]
    async fn fingerprint_auth_accepts_known_server() {
        let cert = generate_cert(&["relp-test"]);
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) =
            start_engine(None, Some(server_tls(&cert)), events.clone()).await;

        let client_tls = TlsSettings {
            enabled: true,
            auth_mode: AuthMode::Fingerprint,
            permitted_peers: vec![cert.fingerprint.clone()],
            ..TlsSettings::default()
        };
        let client_events = Arc::new(Collector::default());
        let mut client = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .timeout(Duration::from_secs(5))
            .tls(client_tls)
            .events(client_events.clone())
            .connect()
            .await
            .unwrap();

        client.send_syslog(b"secure hello").await.unwrap();
        client.disconnect().await.unwrap();

        let msgs = events.messages();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].2, b"secure hello");
        assert!(client_events.auth_errors.lock().unwrap().is_empty());

        stop.stop();
        engine.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn fingerprint_mismatch_raises_auth_error() {
        let cert = generate_cert(&["relp-test"]);
        let events = Arc::new(Collector::default());
        let (addr, stop, engine) = start_engine(None, Some(server_tls(&cert)), events).await;

        let client_tls = TlsSettings {
            enabled: true,
            auth_mode: AuthMode::Fingerprint,
            permitted_peers: vec![
                "SHA1:00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33".to_string(),
            ],
            ..TlsSettings::default()
        };
        let client_events = Arc::new(Collector::default());
        let result = ClientBuilder::new("127.0.0.1")
            .port(addr.port())
            .timeout(Duration::from_secs(5))
            .tls(client_tls)
            .events(client_events.clone())
            .connect()
            .await;
        assert!(matches!(result, Err(RelpError::AuthFingerprint(_))));

        let auth_errors = client_events.auth_errors.lock().unwrap();
        assert_eq!(auth_errors.len(), 1);
        assert_eq!(auth_errors[0].0, cert.fingerprint);
        assert_eq!(auth_errors[0].1, ErrorCode::AuthErrFp);

        stop.stop();
        engine.await.unwrap().unwrap();
    }
}
