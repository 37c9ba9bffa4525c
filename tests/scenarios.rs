//! Integration tests for the numbered scenarios against an in-memory store
//! and a request-recording `SipTransport` test double.

use async_trait::async_trait;
use dialog_bridge::dialog::DialogueManager;
use dialog_bridge::error::Result;
use dialog_bridge::events::TracingMonitorSink;
use dialog_bridge::store::{
    Dialogue, DialoguePredicate, DialogueStore, InMemoryCdrStore, InMemoryDialogueStore, UserField,
};
use dialog_bridge::transport::{InboundTransaction, SipTransport, TransactionEvent, TransactionEventReceiver};
use dialog_bridge::{BridgeConfig, DialogueId, TransactionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct RecordingTransport {
    sent: Mutex<Vec<rsip::Request>>,
    responses: Mutex<Vec<(u16, bool)>>,
    inbound: Mutex<HashMap<TransactionId, InboundTransaction>>,
}

impl RecordingTransport {
    fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            inbound: Mutex::new(HashMap::new()),
        }
    }

    fn sent_methods(&self) -> Vec<rsip::Method> {
        self.sent.lock().unwrap().iter().map(|r| r.method.clone()).collect()
    }
}

#[async_trait]
impl SipTransport for RecordingTransport {
    async fn create_uac_transaction(
        &self,
        request: rsip::Request,
    ) -> Result<(TransactionId, TransactionEventReceiver)> {
        self.sent.lock().unwrap().push(request);
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok((TransactionId::new(), rx))
    }

    async fn create_non_invite_transaction(
        &self,
        request: rsip::Request,
    ) -> Result<(TransactionId, TransactionEventReceiver)> {
        self.sent.lock().unwrap().push(request);
        let (_tx, rx) = mpsc::unbounded_channel();
        Ok((TransactionId::new(), rx))
    }

    async fn send(&self, _id: &TransactionId, _destination: SocketAddr) -> Result<()> {
        Ok(())
    }

    fn get_transaction(&self, id: &TransactionId) -> Option<InboundTransaction> {
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
        self.responses.lock().unwrap().push((u16::from(response.status_code), is_final));
        Ok(())
    }
}

fn uri(s: &str) -> rsip::Uri {
    s.try_into().unwrap()
}

fn dialogue(call_id: &str, local_tag: &str, remote_tag: &str, owner: &str, cseq: u32) -> Dialogue {
    Dialogue {
        id: DialogueId::new(),
        call_id: call_id.to_string(),
        local_tag: local_tag.to_string(),
        remote_tag: remote_tag.to_string(),
        cseq,
        route_set: vec![],
        remote_target: uri("sip:bob@example.com"),
        local_user_field: UserField::new(None, uri("sip:alice@example.com")),
        remote_user_field: UserField::new(None, uri("sip:bob@example.com")),
        owner: owner.to_string(),
        bridge_id: None,
        cdr_id: None,
        remote_sdp: None,
        proxy_send_from: None,
    }
}

fn manager(store: Arc<dyn DialogueStore>) -> (DialogueManager, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::new());
    let manager = DialogueManager::new(
        store,
        Arc::new(InMemoryCdrStore::new()),
        transport.clone(),
        Arc::new(TracingMonitorSink),
        BridgeConfig::default(),
    );
    (manager, transport)
}

/// Scenario 1: hangup propagation.
#[tokio::test]
async fn hangup_propagation_sends_bye_and_deletes_both_dialogues() {
    let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
    let (manager, transport) = manager(store.clone());

    let mut d1 = dialogue("call-1", "L1", "R1", "alice", 10);
    let mut d2 = dialogue("call-1", "L2", "R2", "alice", 20);
    let bridge_id = dialog_bridge::BridgeId::new();
    d1.bridge_id = Some(bridge_id);
    d2.bridge_id = Some(bridge_id);
    let (d1_id, d2_id) = (d1.id, d2.id);
    store.add(d1).unwrap();
    store.add(d2).unwrap();

    manager.call_hungup(d1_id, "user").await.unwrap();

    assert!(store.get(&DialoguePredicate::ById(d1_id)).unwrap().is_none());
    assert!(store.get(&DialoguePredicate::ById(d2_id)).unwrap().is_none());
    assert_eq!(transport.sent_methods(), vec![rsip::Method::Bye]);
}

/// Scenario 2: relaxed lookup fallbacks.
#[tokio::test]
async fn relaxed_lookup_falls_back_to_local_tag_then_abandons_on_ambiguity() {
    let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
    store.add(dialogue("a", "L", "R", "alice", 1)).unwrap();

    let index = dialog_bridge::DialogueIndex::new(store.as_ref());
    assert!(index.get_by_triple("a", "L", "R").unwrap().is_some());
    assert!(index.get_by_triple("a", "L", "R2").unwrap().is_some());

    store.add(dialogue("a", "L2", "R2", "alice", 1)).unwrap();
    assert!(index.get_by_triple("a", "Lx", "Rx").unwrap().is_none());
}

/// Scenario 3: Replaces parsing.
#[tokio::test]
async fn replaces_value_unescapes_and_resolves() {
    let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
    store.add(dialogue("abc@host", "t", "f", "alice", 1)).unwrap();

    let index = dialog_bridge::DialogueIndex::new(store.as_ref());
    let found = index
        .get_by_replaces("abc%40host;to-tag=t;from-tag=f")
        .unwrap();
    assert!(found.is_some());
}

/// Scenario 6: SDP rewrite on re-forward.
#[tokio::test]
async fn forward_in_dialogue_mangles_private_sdp_address() {
    let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
    let (manager, transport) = manager(store.clone());

    let mut leg_a = dialogue("call-1", "L1", "R1", "alice", 10);
    let mut leg_b = dialogue("call-1", "L2", "R2", "alice", 20);
    let bridge_id = dialog_bridge::BridgeId::new();
    leg_a.bridge_id = Some(bridge_id);
    leg_b.bridge_id = Some(bridge_id);
    let leg_a_id = leg_a.id;
    store.add(leg_a).unwrap();
    store.add(leg_b).unwrap();

    let sdp = "v=0\r\no=- 1 1 IN IP4 10.0.0.5\r\ns=-\r\nc=IN IP4 10.0.0.5\r\nt=0 0\r\nm=audio 49170 RTP/AVP 0\r\n";
    let mut headers: rsip::Headers = Default::default();
    headers.push(rsip::Header::ContentLength((sdp.len() as u32).into()));
    let inbound_request = rsip::Request {
        method: rsip::Method::Invite,
        uri: uri("sip:alice@example.com"),
        version: rsip::Version::V2,
        headers,
        body: sdp.as_bytes().to_vec(),
    };
    let txn = InboundTransaction {
        id: TransactionId::new(),
        request: inbound_request,
    };

    let local_ep: SocketAddr = "127.0.0.1:5060".parse().unwrap();
    let remote_ep: SocketAddr = "203.0.113.7:5060".parse().unwrap();
    manager
        .forward_in_dialogue(leg_a_id, txn, local_ep, remote_ep)
        .await
        .unwrap();

    let sent = transport.sent.lock().unwrap();
    let forwarded = sent.last().expect("one forwarded request recorded");
    let body = String::from_utf8(forwarded.body.clone()).unwrap();
    assert!(body.contains("c=IN IP4 203.0.113.7"), "body was: {body}");
    assert!(body.contains("o=- 1 1 IN IP4 10.0.0.5"), "only c= line should change");
}

/// Scenario 4: attended transfer rebridges the two surviving legs and tears
/// down both original legs.
#[tokio::test]
async fn attended_refer_rebridges_surviving_legs_and_terminates_originals() {
    let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
    let (manager, transport) = manager(store.clone());

    // d <-> rem2 is the call that issues the REFER.
    let d = dialogue("call-d", "Ld", "Rd", "alice", 1);
    let rem2 = dialogue("call-d", "Lrem2", "Rrem2", "alice", 1);
    let bridge1 = dialog_bridge::BridgeId::new();
    let mut d = d;
    let mut rem2 = rem2;
    d.bridge_id = Some(bridge1);
    rem2.bridge_id = Some(bridge1);
    let (d_id, rem2_id) = (d.id, rem2.id);

    // r <-> rem is the call named by the Replaces parameter.
    let mut r = dialogue("call-r", "Ltag", "Rtag", "alice", 1);
    let mut rem = dialogue("call-r", "Lrem", "Rrem", "alice", 1);
    let bridge2 = dialog_bridge::BridgeId::new();
    r.bridge_id = Some(bridge2);
    rem.bridge_id = Some(bridge2);
    let (r_id, rem_id) = (r.id, rem.id);

    store.add(d).unwrap();
    store.add(rem2).unwrap();
    store.add(r).unwrap();
    store.add(rem).unwrap();

    let refer_to = "<sip:bob@example.com?Replaces=call-r%3Bto-tag=Ltag%3Bfrom-tag=Rtag>";
    let mut headers: rsip::Headers = Default::default();
    headers.push(rsip::Header::Other("Refer-To".to_string(), refer_to.to_string()));
    headers.push(rsip::Header::ContentLength(0.into()));
    let inbound_request = rsip::Request {
        method: rsip::Method::Refer,
        uri: uri("sip:alice@example.com"),
        version: rsip::Version::V2,
        headers,
        body: Vec::new(),
    };
    let txn = InboundTransaction {
        id: TransactionId::new(),
        request: inbound_request,
    };

    let local_ep: SocketAddr = "127.0.0.1:5060".parse().unwrap();
    let remote_ep: SocketAddr = "203.0.113.7:5060".parse().unwrap();
    manager
        .handle_refer(d_id, txn, local_ep, remote_ep)
        .await
        .unwrap();

    assert!(
        transport.responses.lock().unwrap().contains(&(202, true)),
        "expected a 202 Accepted response to the REFER"
    );

    let rem_row = store.get(&DialoguePredicate::ById(rem_id)).unwrap().expect("rem survives");
    let rem2_row = store.get(&DialoguePredicate::ById(rem2_id)).unwrap().expect("rem2 survives");
    assert!(rem_row.bridge_id.is_some());
    assert_eq!(rem_row.bridge_id, rem2_row.bridge_id);
    assert_ne!(rem_row.bridge_id, Some(bridge1));
    assert_ne!(rem_row.bridge_id, Some(bridge2));

    assert!(store.get(&DialoguePredicate::ById(d_id)).unwrap().is_none(), "referring leg terminated");
    assert!(store.get(&DialoguePredicate::ById(r_id)).unwrap().is_none(), "replaced leg terminated");

    let methods = transport.sent_methods();
    assert_eq!(methods.iter().filter(|m| **m == rsip::Method::Invite).count(), 2, "both legs re-INVITEd");
    assert_eq!(methods.iter().filter(|m| **m == rsip::Method::Bye).count(), 2, "both original legs get a BYE");
    assert_eq!(methods.iter().filter(|m| **m == rsip::Method::Notify).count(), 2, "progress and completion NOTIFYs");
}
