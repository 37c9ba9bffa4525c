//! SIP Transport collaborator: parses/serializes SIP, routes
//! requests to transactions, resolves next-hop endpoints. This crate only
//! defines the narrow trait surface the Dialogue Manager calls through; a
//! real transaction layer (UAC/UAS state machines, retransmission timers)
//! lives on the other side of it, out of scope here.

use crate::error::Result;
use crate::ids::TransactionId;
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::sync::mpsc::UnboundedReceiver;

/// An inbound transaction as seen by the Dialogue Manager: enough to build
/// response headers from (`request`) and to key the in-dialogue map with
/// (`id`).
#[derive(Debug, Clone)]
pub struct InboundTransaction {
    pub id: TransactionId,
    pub request: rsip::Request,
}

/// Events delivered for a transaction the manager created via
/// [`SipTransport::create_uac_transaction`] or
/// [`SipTransport::create_non_invite_transaction`].
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    Provisional(rsip::Response),
    Final(rsip::Response),
    /// The transaction layer finalized and dropped this transaction; the
    /// in-dialogue map entry for it should be removed.
    Removed,
}

pub type TransactionEventReceiver = UnboundedReceiver<TransactionEvent>;

/// The collaborator the Dialogue Manager calls through to send requests,
/// send responses, and resolve next hops.
#[async_trait]
pub trait SipTransport: Send + Sync {
    /// Registers `request` as a new UAC (INVITE) transaction. Does not send
    /// it — see [`SipTransport::send`] — so a caller can install its
    /// in-dialogue map entry before the request reaches the wire.
    async fn create_uac_transaction(
        &self,
        request: rsip::Request,
    ) -> Result<(TransactionId, TransactionEventReceiver)>;

    /// As [`SipTransport::create_uac_transaction`], for non-INVITE methods.
    async fn create_non_invite_transaction(
        &self,
        request: rsip::Request,
    ) -> Result<(TransactionId, TransactionEventReceiver)>;

    /// Sends the request registered under `id` to `destination`.
    async fn send(&self, id: &TransactionId, destination: SocketAddr) -> Result<()>;

    /// Looks up a still-live inbound transaction by id, e.g. to rebuild a
    /// response against its original request.
    fn get_transaction(&self, id: &TransactionId) -> Option<InboundTransaction>;

    /// Resolves the concrete next-hop endpoint for `request` (DNS/SRV
    /// resolution proper is out of scope here — this delegates to whatever
    /// resolver the collaborator wraps). `None` means no endpoint could be
    /// resolved.
    async fn get_request_endpoint(
        &self,
        request: &rsip::Request,
        outbound_proxy: Option<SocketAddr>,
        wildcard_ok: bool,
    ) -> Result<Option<SocketAddr>>;

    /// The default local endpoint to advertise in Contact/Via for a given
    /// transport protocol.
    fn get_default_endpoint(&self, protocol: rsip::Transport) -> SocketAddr;

    /// Sends `response` on the given inbound transaction. `is_final`
    /// distinguishes the 1xx/final dispatch path.
    async fn respond(
        &self,
        txn: &InboundTransaction,
        response: rsip::Response,
        is_final: bool,
    ) -> Result<()>;
}
