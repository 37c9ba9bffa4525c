//! A SIP back-to-back user agent (B2BUA) dialogue layer and RTP media
//! channel core.
//!
//! The dialogue layer ([`dialog`]) tracks established SIP calls as pairs of
//! peer legs glued by a bridge identifier, forwards in-dialogue requests
//! across the bridge with header rewriting and SDP mangling, and implements
//! blind and attended call transfer (RFC 3515 / RFC 3891). The RTP channel
//! ([`rtp`]) manages a media/control UDP socket pair with a perpetual
//! receive loop and a send path that tolerates transient socket errors.
//!
//! Call origination, endpoint authentication, DNS/SRV resolution,
//! dial-plan/policy enforcement, and media codecs are out of scope; the
//! [`transport::SipTransport`] and [`store`] traits are the seams where a
//! host application supplies those concerns.

pub mod config;
pub mod dialog;
pub mod error;
pub mod events;
pub mod ids;
pub mod rtp;
pub mod sdp;
pub mod store;
pub mod transport;

pub use config::BridgeConfig;
pub use dialog::{DialogueIndex, DialogueManager};
pub use error::{Error, Result};
pub use events::{DialogueEventKind, MonitorEvent, MonitorSink, TracingMonitorSink};
pub use ids::{BridgeId, CdrId, DialogueId, TransactionId};
