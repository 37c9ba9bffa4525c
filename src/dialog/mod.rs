//! Dialogue Index + Dialogue Manager: the bridge lifecycle, in-dialogue
//! forwarding, and REFER/Replaces transfer state machine that make up the
//! majority of this crate.

mod index;
mod manager;
mod refer;
mod transaction_map;

pub use index::DialogueIndex;
pub use manager::DialogueManager;

use crate::error::Result;
use crate::ids::DialogueId;
use crate::transport::InboundTransaction;
use std::net::SocketAddr;

impl DialogueManager {
    /// Dispatches an inbound REFER through the blind/attended transfer
    /// state machine.
    pub async fn handle_refer(
        &self,
        d: DialogueId,
        txn: InboundTransaction,
        local_ep: SocketAddr,
        remote_ep: SocketAddr,
    ) -> Result<()> {
        refer::handle_refer(self, d, txn, local_ep, remote_ep).await
    }
}
