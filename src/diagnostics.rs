//! Diagnostics side-channel
//!
//! The DAP stream on stdout cannot carry free-form text without breaking
//! framing, so internal narration goes to a single TCP client instead. The
//! listener runs on its own task and only ever writes outward; the session
//! never waits on it.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// Cloneable writer handed to the logging layer
///
/// Writes never fail and never block: a line is queued for the listener
/// task, or dropped when the channel is gone.
#[derive(Clone)]
pub struct DiagnosticsSink {
    tx: mpsc::UnboundedSender<String>,
}

impl io::Write for DiagnosticsSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.tx.send(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving half, consumed by [`DiagnosticsChannel::serve`]
pub struct DiagnosticsChannel {
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a connected sink/channel pair
///
/// Needs no runtime, so the sink can be wired into logging before the
/// listener is bound.
pub fn channel() -> (DiagnosticsSink, DiagnosticsChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DiagnosticsSink { tx }, DiagnosticsChannel { rx })
}

/// Handle reporting whether a diagnostics client has connected
pub struct DiagnosticsHandle {
    local_addr: SocketAddr,
    connected: watch::Receiver<bool>,
}

impl DiagnosticsHandle {
    /// Address the listener actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait up to `timeout` for a client; returns whether one connected
    pub async fn wait_for_client(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.connected.wait_for(|c| *c))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

impl DiagnosticsChannel {
    /// Bind the listener and start the writer task
    pub async fn serve(self, addr: SocketAddr) -> io::Result<DiagnosticsHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (connected_tx, connected) = watch::channel(false);

        tokio::spawn(run(listener, self.rx, connected_tx));

        Ok(DiagnosticsHandle {
            local_addr,
            connected,
        })
    }
}

async fn run(
    listener: TcpListener,
    mut rx: mpsc::UnboundedReceiver<String>,
    connected: watch::Sender<bool>,
) {
    // Lines logged before anyone is listening are discarded
    let mut stream: TcpStream = loop {
        tokio::select! {
            accepted = listener.accept() => {
                if let Ok((stream, _peer)) = accepted {
                    break stream;
                }
            }
            line = rx.recv() => {
                if line.is_none() {
                    return;
                }
            }
        }
    };
    let _ = connected.send(true);
    drop(listener);

    while let Some(line) = rx.recv().await {
        if stream.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}
