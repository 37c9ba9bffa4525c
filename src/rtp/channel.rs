use super::receiver::{ReceiverEvent, UdpReceiver};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

/// Which of the channel's two sockets a packet travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Media,
    Control,
}

/// Outcome of a single `send`. A failed individual send never closes the
/// channel — callers observe the outcome purely to update counters or
/// demote to a transient condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    Disconnecting,
    TransientError(i32),
    Fault,
}

#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Rtp { remote: SocketAddr, bytes: Bytes },
    Control { remote: SocketAddr, bytes: Bytes },
    Closed(String),
}

/// Port range and socket-layout knobs for [`RtpChannel::bind`].
#[derive(Debug, Clone)]
pub struct RtpChannelConfig {
    pub bind_ip: IpAddr,
    pub media_start: u16,
    pub media_end: u16,
    pub create_control_socket: bool,
}

impl Default for RtpChannelConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::from([0, 0, 0, 0]),
            media_start: 10_000,
            media_end: 20_000,
            create_control_socket: true,
        }
    }
}

/// A pair of UDP sockets (media + control), or one multiplexed socket when
/// `create_control_socket = false`.
pub struct RtpChannel {
    media: UdpReceiver,
    control: Option<UdpReceiver>,
    closed: Arc<AtomicBool>,
    events_tx: UnboundedSender<ChannelEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<ChannelEvent>>>,
    last_remote_media: Arc<Mutex<Option<SocketAddr>>>,
    last_remote_control: Arc<Mutex<Option<SocketAddr>>>,
}

impl RtpChannel {
    /// Bind the channel's socket(s) on a consecutive (or adjacent even/odd)
    /// port pair within `[config.media_start, config.media_end]`.
    pub async fn bind(config: &RtpChannelConfig) -> Result<Self> {
        let (media_raw_tx, media_raw_rx) = unbounded_channel();
        let (control_raw_tx, control_raw_rx) = if config.create_control_socket {
            let (tx, rx) = unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let (media_socket, control_socket) = bind_port_pair(config).await?;

        let media = UdpReceiver::new(media_socket, media_raw_tx)?;
        let control = match control_socket {
            Some(socket) => Some(UdpReceiver::new(socket, control_raw_tx.unwrap())?),
            None => None,
        };

        let (events_tx, events_rx) = unbounded_channel();
        let last_remote_media = Arc::new(Mutex::new(None));
        let last_remote_control = Arc::new(Mutex::new(None));

        let channel = Self {
            media,
            control,
            closed: Arc::new(AtomicBool::new(false)),
            events_tx: events_tx.clone(),
            events_rx: Mutex::new(Some(events_rx)),
            last_remote_media: last_remote_media.clone(),
            last_remote_control: last_remote_control.clone(),
        };

        spawn_forwarder(
            media_raw_rx,
            PacketKind::Media,
            events_tx.clone(),
            last_remote_media,
        );
        if let Some(control_raw_rx) = control_raw_rx {
            spawn_forwarder(control_raw_rx, PacketKind::Control, events_tx, last_remote_control);
        }

        Ok(channel)
    }

    pub fn media_local_ep(&self) -> SocketAddr {
        self.media.local_ep()
    }

    pub fn control_local_ep(&self) -> Option<SocketAddr> {
        self.control.as_ref().map(|c| c.local_ep())
    }

    /// Installs and starts both receivers.
    pub fn start(&self) {
        self.media.begin_receive();
        if let Some(control) = &self.control {
            control.begin_receive();
        }
    }

    /// Takes the event stream. Callers are expected to call this once after
    /// `start()` and poll it for `on_rtp`/`on_control`/`on_closed`.
    pub fn events(&self) -> UnboundedReceiver<ChannelEvent> {
        self.events_rx
            .lock()
            .unwrap()
            .take()
            .expect("RtpChannel::events() called more than once")
    }

    /// Last-seen remote media endpoint. Reporting only: does not gate
    /// `send`, which always targets the caller-supplied destination.
    pub fn last_remote_media(&self) -> Option<SocketAddr> {
        *self.last_remote_media.lock().unwrap()
    }

    pub fn last_remote_control(&self) -> Option<SocketAddr> {
        *self.last_remote_control.lock().unwrap()
    }

    /// Fire-and-forget send: the buffer is handed to the OS transmit queue
    /// and completion is observed only to classify the outcome.
    pub async fn send(&self, kind: PacketKind, dst: Option<SocketAddr>, bytes: &[u8]) -> SendOutcome {
        let Some(dst) = dst else {
            return SendOutcome::Fault;
        };
        if bytes.is_empty() {
            return SendOutcome::Fault;
        }
        if self.closed.load(Ordering::SeqCst) {
            return SendOutcome::Disconnecting;
        }

        let receiver = match kind {
            PacketKind::Media => &self.media,
            PacketKind::Control => match &self.control {
                Some(c) => c,
                None => &self.media,
            },
        };

        match receiver.send_to(dst, bytes).await {
            Ok(_) => SendOutcome::Ok,
            Err(e) => classify_send_error(&e),
        }
    }

    /// Shuts down both receivers, marks the channel closed, fires
    /// `on_closed` exactly once.
    pub fn close(&self, reason: impl Into<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        self.media.close(reason.clone());
        if let Some(control) = &self.control {
            control.close(reason.clone());
        }
        let _ = self.events_tx.send(ChannelEvent::Closed(reason));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn classify_send_error(e: &io::Error) -> SendOutcome {
    match e.raw_os_error() {
        Some(code) if is_transient_os_error(e) => SendOutcome::TransientError(code),
        _ => SendOutcome::Fault,
    }
}

fn is_transient_os_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

async fn bind_port_pair(config: &RtpChannelConfig) -> Result<(UdpSocket, Option<UdpSocket>)> {
    let mut port = config.media_start;
    loop {
        if port > config.media_end || (config.create_control_socket && port + 1 > config.media_end) {
            return Err(Error::InternalFault(format!(
                "no free port pair in [{}, {}]",
                config.media_start, config.media_end
            )));
        }

        let media_addr = SocketAddr::new(config.bind_ip, port);
        let media_socket = match UdpSocket::bind(media_addr).await {
            Ok(s) => s,
            Err(_) => {
                port += 2;
                continue;
            }
        };

        if !config.create_control_socket {
            return Ok((media_socket, None));
        }

        let control_addr = SocketAddr::new(config.bind_ip, port + 1);
        match UdpSocket::bind(control_addr).await {
            Ok(control_socket) => return Ok((media_socket, Some(control_socket))),
            Err(_) => {
                drop(media_socket);
                port += 2;
                continue;
            }
        }
    }
}

fn spawn_forwarder(
    mut raw_rx: UnboundedReceiver<ReceiverEvent>,
    kind: PacketKind,
    events_tx: UnboundedSender<ChannelEvent>,
    last_remote: Arc<Mutex<Option<SocketAddr>>>,
) {
    tokio::spawn(async move {
        while let Some(event) = raw_rx.recv().await {
            match event {
                ReceiverEvent::Packet {
                    remote_ep, bytes, ..
                } => {
                    *last_remote.lock().unwrap() = Some(remote_ep);
                    let mapped = match kind {
                        PacketKind::Media => ChannelEvent::Rtp {
                            remote: remote_ep,
                            bytes,
                        },
                        PacketKind::Control => ChannelEvent::Control {
                            remote: remote_ep,
                            bytes,
                        },
                    };
                    if events_tx.send(mapped).is_err() {
                        return;
                    }
                }
                ReceiverEvent::Closed(reason) => {
                    info!(?kind, %reason, "socket closed");
                    let _ = events_tx.send(ChannelEvent::Closed(reason));
                    return;
                }
            }
        }
    });
}

impl std::fmt::Debug for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketKind::Media => write!(f, "Media"),
            PacketKind::Control => write!(f, "Control"),
        }
    }
}
