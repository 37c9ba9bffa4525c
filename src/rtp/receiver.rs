use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receive buffer sized to a typical MTU upper bound.
pub const RECV_BUFFER_SIZE: usize = 2048;

#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    Packet {
        local_ep: SocketAddr,
        remote_ep: SocketAddr,
        bytes: Bytes,
    },
    Closed(String),
}

/// Owns one bound UDP socket and its perpetual receive loop.
///
/// The loop re-arms after every successful receive and keeps running across
/// the routine UDP/RTP anomalies (remote sends before we're listening, a
/// transfer swaps the remote endpoint) without closing — only an
/// unrecognized error closes the receiver.
pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
    local_ep: SocketAddr,
    closed: Arc<AtomicBool>,
    events_tx: UnboundedSender<ReceiverEvent>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpReceiver {
    pub fn new(socket: UdpSocket, events_tx: UnboundedSender<ReceiverEvent>) -> io::Result<Self> {
        let local_ep = socket.local_addr()?;
        Ok(Self {
            socket: Arc::new(socket),
            local_ep,
            closed: Arc::new(AtomicBool::new(false)),
            events_tx,
            task: Mutex::new(None),
        })
    }

    pub fn local_ep(&self) -> SocketAddr {
        self.local_ep
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Install and start the perpetual receive loop. Calling this more than
    /// once replaces the previous loop's task handle (the previous task is
    /// left to notice `closed` on its next error, if any).
    pub fn begin_receive(&self) {
        let socket = self.socket.clone();
        let closed = self.closed.clone();
        let tx = self.events_tx.clone();
        let local_ep = self.local_ep;
        let handle = tokio::spawn(async move {
            receive_loop(socket, closed, tx, local_ep).await;
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Idempotent: only the first call aborts the loop and fires `Closed`.
    pub fn close(&self, reason: impl Into<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        let _ = self.events_tx.send(ReceiverEvent::Closed(reason.into()));
    }

    pub async fn send_to(&self, dst: SocketAddr, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send_to(bytes, dst).await
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    tx: UnboundedSender<ReceiverEvent>,
    local_ep: SocketAddr,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((0, _)) => continue,
            Ok((n, remote_ep)) => {
                let bytes = Bytes::copy_from_slice(&buf[..n]);
                if tx
                    .send(ReceiverEvent::Packet {
                        local_ep,
                        remote_ep,
                        bytes,
                    })
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                if closed.load(Ordering::SeqCst) {
                    // Close race: the disposed condition is expected, not fatal.
                    return;
                }
                if is_transient(&e) {
                    info!(error = %e, %local_ep, "transient UDP receive error, re-arming");
                    continue;
                }
                warn!(error = %e, %local_ep, "unexpected UDP receive error, closing receiver");
                closed.store(true, Ordering::SeqCst);
                let _ = tx.send(ReceiverEvent::Closed(e.to_string()));
                return;
            }
        }
    }
}

/// Errors endemic to UDP/RTP: ICMP port-unreachable bouncing back as
/// `ConnectionReset`, or a peer briefly unreachable during a transfer.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
    )
}
