use serde::{Deserialize, Serialize};

/// Construction-time knobs for the [`crate::dialog::manager::DialogueManager`]:
/// the configured `remote_hangup_cause`, outward-facing User-Agent, and RTP
/// port layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Cause recorded on the peer leg's CDR when the other leg hangs up
    /// first.
    pub remote_hangup_cause: String,
    pub user_agent: String,
    pub media_port_range: (u16, u16),
    pub create_control_socket: bool,
    /// NOTIFY subscription expiry advertised during an attended transfer.
    pub refer_notify_expires: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            remote_hangup_cause: "Peer hung up".to_string(),
            user_agent: "dialog-bridge/0.1".to_string(),
            media_port_range: (10_000, 20_000),
            create_control_socket: true,
            refer_notify_expires: 32,
        }
    }
}
