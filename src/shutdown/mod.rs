//! Shutdown plumbing
//!
//! Forced shutdown of the engine's remote listeners between runs, and the
//! interrupt used to cancel a run that is waiting on the log.

mod interrupt;

use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

pub use interrupt::{listen_for_ctrl_c, InterruptHandle, InterruptListener};

/// Port the engine's non-GUI shutdown listener binds by default
pub const DEFAULT_SHUTDOWN_PORT: u16 = 4445;

/// Command understood by the shutdown listener
pub const SHUTDOWN_COMMAND: &str = "Shutdown";

/// Releases listeners the engine may have left open after a run.
///
/// Must be idempotent: it is called after every run whether or not anything
/// is still listening.
pub trait ListenerShutdown: Send + Sync {
    fn shutdown(&self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Sends the shutdown command to the engine's UDP listener
#[derive(Clone, Debug)]
pub struct UdpShutdownClient {
    target: SocketAddr,
}

impl Default for UdpShutdownClient {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_PORT)
    }
}

impl UdpShutdownClient {
    pub fn new(port: u16) -> Self {
        Self {
            target: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl ListenerShutdown for UdpShutdownClient {
    async fn shutdown(&self) -> io::Result<()> {
        let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await?;
        socket
            .send_to(SHUTDOWN_COMMAND.as_bytes(), self.target)
            .await?;
        debug!("Sent {} to {}", SHUTDOWN_COMMAND, self.target);
        Ok(())
    }
}
