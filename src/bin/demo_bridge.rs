//! Small demo wiring an in-memory store, a loopback `SipTransport` stub, and
//! a `DialogueManager` together to drive a bridge + hangup scenario end to
//! end.

use clap::Parser;
use dialog_bridge::dialog::DialogueManager;
use dialog_bridge::error::Result;
use dialog_bridge::events::TracingMonitorSink;
use dialog_bridge::store::{Dialogue, DialogueStore, InMemoryCdrStore, InMemoryDialogueStore, UserField};
use dialog_bridge::transport::{InboundTransaction, SipTransport, TransactionEvent, TransactionEventReceiver};
use dialog_bridge::{BridgeConfig, DialogueId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "demo_bridge", about = "Drives a bridge + hangup scenario against a loopback transport")]
struct Cli {
    /// Account name attributed to the demo bridge.
    #[arg(long, default_value = "demo")]
    owner: String,

    /// Log verbosity (passed straight to `EnvFilter`).
    #[arg(long, default_value = "dialog_bridge=info")]
    log_filter: String,
}

/// A transport stub that logs every request it's asked to send instead of
/// touching a real socket; good enough to exercise the manager's control
/// flow without a live SIP peer.
struct LoopbackTransport {
    inbound: Mutex<HashMap<dialog_bridge::TransactionId, InboundTransaction>>,
}

impl LoopbackTransport {
    fn new() -> Self {
        Self {
            inbound: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SipTransport for LoopbackTransport {
    async fn create_uac_transaction(
        &self,
        request: rsip::Request,
    ) -> Result<(dialog_bridge::TransactionId, TransactionEventReceiver)> {
        tracing::info!(method = %request.method, uri = %request.uri, "dispatching UAC transaction");
        let (_tx, rx) = mpsc::unbounded_channel::<TransactionEvent>();
        Ok((dialog_bridge::TransactionId::new(), rx))
    }

    async fn create_non_invite_transaction(
        &self,
        request: rsip::Request,
    ) -> Result<(dialog_bridge::TransactionId, TransactionEventReceiver)> {
        tracing::info!(method = %request.method, uri = %request.uri, "dispatching non-INVITE transaction");
        let (_tx, rx) = mpsc::unbounded_channel::<TransactionEvent>();
        Ok((dialog_bridge::TransactionId::new(), rx))
    }

    async fn send(&self, _id: &dialog_bridge::TransactionId, destination: SocketAddr) -> Result<()> {
        tracing::info!(%destination, "send");
        Ok(())
    }

    fn get_transaction(&self, id: &dialog_bridge::TransactionId) -> Option<InboundTransaction> {
        self.inbound.lock().unwrap().get(id).cloned()
    }

    async fn get_request_endpoint(
        &self,
        _request: &rsip::Request,
        _outbound_proxy: Option<SocketAddr>,
        _wildcard_ok: bool,
    ) -> Result<Option<SocketAddr>> {
        Ok(Some("127.0.0.1:5060".parse().unwrap()))
    }

    fn get_default_endpoint(&self, _protocol: rsip::Transport) -> SocketAddr {
        "127.0.0.1:5060".parse().unwrap()
    }

    async fn respond(&self, _txn: &InboundTransaction, response: rsip::Response, is_final: bool) -> Result<()> {
        tracing::info!(status = %response.status_code, %is_final, "respond");
        Ok(())
    }
}

fn seed_dialogue(call_id: &str, local_tag: &str, remote_tag: &str, owner: &str) -> Dialogue {
    Dialogue {
        id: DialogueId::new(),
        call_id: call_id.to_string(),
        local_tag: local_tag.to_string(),
        remote_tag: remote_tag.to_string(),
        cseq: 1,
        route_set: vec![],
        remote_target: "sip:bob@203.0.113.7:5060".try_into().unwrap(),
        local_user_field: UserField::new(Some("Alice".to_string()), "sip:alice@example.com".try_into().unwrap()),
        remote_user_field: UserField::new(Some("Bob".to_string()), "sip:bob@example.com".try_into().unwrap()),
        owner: owner.to_string(),
        bridge_id: None,
        cdr_id: None,
        remote_sdp: None,
        proxy_send_from: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(cli.log_filter))
        .init();

    let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
    let cdr_store = Arc::new(InMemoryCdrStore::new());
    let transport = Arc::new(LoopbackTransport::new());
    let monitor = Arc::new(TracingMonitorSink);

    let manager = DialogueManager::new(store.clone(), cdr_store, transport, monitor, BridgeConfig::default());

    let a = seed_dialogue("demo-call-1", "tagA", "tagB", &cli.owner);
    let b = seed_dialogue("demo-call-1", "tagB", "tagA", &cli.owner);
    let (a_id, b_id) = (a.id, b.id);
    store.add(a)?;
    store.add(b)?;

    manager.create_bridge(a_id, b_id, &cli.owner).await?;
    tracing::info!("bridge created, hanging up leg A");

    manager.call_hungup(a_id, "user").await?;
    tracing::info!("demo scenario complete");

    Ok(())
}
