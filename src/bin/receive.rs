//! Minimal RELP receiver: listens on a port and prints received messages
//! until interrupted.
//!
//! ```text
//! receive [-p <port>]
//! ```

use relp::config::DEFAULT_PORT;
use relp::engine::{Engine, EventSink};
use relp::error::ErrorCode;
use relp::server::ListenerConfig;
use std::process::ExitCode;
use std::sync::Arc;

struct Printer;

impl EventSink for Printer {
    fn on_syslog(&self, hostname: &str, _ip: &str, msg: &[u8]) -> Result<(), String> {
        println!("{}: {}", hostname, String::from_utf8_lossy(msg));
        Ok(())
    }

    fn on_error(&self, object: &str, message: &str, _code: ErrorCode) {
        eprintln!("session error ({object}): {message}");
    }

    fn on_generic_error(&self, object: &str, message: &str, _code: ErrorCode) {
        eprintln!("error ({object}): {message}");
    }
}

fn parse_port() -> u16 {
    let mut args = std::env::args().skip(1);
    while let Some(flag) = args.next() {
        if flag == "-p" {
            if let Some(port) = args.next().and_then(|p| p.parse().ok()) {
                return port;
            }
        }
        eprintln!("usage: receive [-p <port>]");
        std::process::exit(2);
    }
    DEFAULT_PORT
}

#[tokio::main]
async fn main() -> ExitCode {
    let port = parse_port();

    let mut engine = Engine::new();
    engine.set_events(Arc::new(Printer));
    engine.add_listener(ListenerConfig::new(port));

    let addrs = match engine.bind().await {
        Ok(addrs) => addrs,
        Err(e) => {
            eprintln!("error binding port {port}: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!("listening on {addrs:?}");

    let stop = engine.stop_handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        println!("shutting down");
        stop.stop();
    });

    if let Err(e) = engine.run().await {
        eprintln!("engine error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
