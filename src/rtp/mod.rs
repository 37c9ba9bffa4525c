//! RTP Channel core: a pair of UDP sockets with an asynchronous receive
//! loop and a send path that tolerates transient per-packet errors without
//! tearing down the session.

mod channel;
mod receiver;

pub use channel::{ChannelEvent, PacketKind, RtpChannel, RtpChannelConfig, SendOutcome};
pub use receiver::{ReceiverEvent, UdpReceiver, RECV_BUFFER_SIZE};
