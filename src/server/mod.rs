// ABOUTME: Server-side facade: listener configuration, accept loops and per-connection sessions
// ABOUTME: Exports the listener config type; sessions are driven internally by the engine

//! RELP server internals.
//!
//! The embedder-facing surface is the [`Engine`](crate::engine::Engine) plus
//! [`ListenerConfig`]; everything below that (accept loops, per-connection
//! session state machines) is crate-private. One accept loop runs per bound
//! socket and every accepted connection becomes its own task, all watching
//! the engine's stop flag.

pub mod listener;
pub(crate) mod session;

pub use listener::ListenerConfig;

use crate::error::ErrorCode;
use listener::ListenerShared;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;

/// Accept connections on one socket until the stop flag flips, spawning a
/// session task per connection.
pub(crate) async fn accept_loop(
    socket: TcpListener,
    acceptor: Option<TlsAcceptor>,
    shared: Arc<ListenerShared>,
    mut stop: watch::Receiver<bool>,
) {
    let mut sessions: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            accepted = socket.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        let shared = shared.clone();
                        let acceptor = acceptor.clone();
                        let stop = stop.clone();
                        sessions.spawn(async move {
                            // session-fatal errors already went through the
                            // error callback inside serve()
                            let _ = session::serve(stream, peer, acceptor, shared, stop).await;
                        });
                    }
                    Err(e) => {
                        shared.events.on_generic_error(
                            "listener",
                            &format!("accept failed: {e}"),
                            ErrorCode::AcceptErr,
                        );
                    }
                }
            }
        }
        // reap sessions that finished on their own
        while sessions.try_join_next().is_some() {}
    }
    // stop flag is set; sessions see it too and wind down with a
    // serverclose hint each
    while sessions.join_next().await.is_some() {}
}
