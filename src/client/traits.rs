// ABOUTME: Trait seams for the RELP client so embedders can abstract over client implementations
// ABOUTME: Uses native async fn in traits; implemented by RelpClient via its inherent methods

use crate::client::session::RelpClient;
use crate::error::RelpResult;
use crate::session::SessionState;

/// Basic connection management for a RELP client.
pub trait RelpConnection {
    /// Orderly close handshake followed by transport teardown.
    fn disconnect(&mut self) -> impl Future<Output = RelpResult<()>> + Send;

    fn is_connected(&self) -> bool;

    fn state(&self) -> SessionState;
}

/// Log transmission on top of an established connection.
pub trait RelpSender: RelpConnection {
    /// Ship one syslog message, acknowledged by the peer.
    fn send_syslog(&mut self, msg: &[u8]) -> impl Future<Output = RelpResult<()>> + Send;
}

impl RelpConnection for RelpClient {
    async fn disconnect(&mut self) -> RelpResult<()> {
        RelpClient::disconnect(self).await
    }

    fn is_connected(&self) -> bool {
        RelpClient::is_connected(self)
    }

    fn state(&self) -> SessionState {
        RelpClient::state(self)
    }
}

impl RelpSender for RelpClient {
    async fn send_syslog(&mut self, msg: &[u8]) -> RelpResult<()> {
        RelpClient::send_syslog(self, msg).await
    }
}
