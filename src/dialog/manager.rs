use crate::config::BridgeConfig;
use crate::dialog::index::DialogueIndex;
use crate::dialog::transaction_map::InDialogueTransactionMap;
use crate::error::{Error, Result};
use crate::events::{MonitorEvent, MonitorSink};
use crate::ids::{BridgeId, DialogueId, TransactionId};
use crate::store::{CdrStore, Dialogue, DialoguePredicate, DialogueProperty, DialogueStore};
use crate::transport::{InboundTransaction, SipTransport, TransactionEvent, TransactionEventReceiver};
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

/// Bridge creation, in-dialogue forwarding, hangup propagation, re-INVITE
/// dispatch. The REFER/Replaces transfer state machine lives in
/// [`crate::dialog::refer`] as a thin layer over the helpers here.
pub struct DialogueManager {
    pub(crate) store: Arc<dyn DialogueStore>,
    pub(crate) cdr_store: Arc<dyn CdrStore>,
    pub(crate) transport: Arc<dyn SipTransport>,
    pub(crate) txn_map: Arc<InDialogueTransactionMap>,
    pub(crate) monitor: Arc<dyn MonitorSink>,
    pub(crate) config: Arc<BridgeConfig>,
}

impl DialogueManager {
    pub fn new(
        store: Arc<dyn DialogueStore>,
        cdr_store: Arc<dyn CdrStore>,
        transport: Arc<dyn SipTransport>,
        monitor: Arc<dyn MonitorSink>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            store,
            cdr_store,
            transport,
            txn_map: Arc::new(InDialogueTransactionMap::new()),
            monitor,
            config: Arc::new(config),
        }
    }

    pub(crate) fn get(&self, id: DialogueId) -> Result<Dialogue> {
        self.store
            .get(&DialoguePredicate::ById(id))?
            .ok_or(Error::NotFound("dialogue not found"))
    }

    pub(crate) fn index(&self) -> DialogueIndex<'_> {
        DialogueIndex::new(self.store.as_ref())
    }

    fn next_cseq(&self, id: DialogueId, current: u32) -> Result<u32> {
        let next = current + 1;
        self.store.update_property(&id, DialogueProperty::Cseq(next))?;
        Ok(next)
    }

    fn fresh_branch() -> String {
        format!("z9hG4bK{:016x}", rand::rng().random::<u64>())
    }

    fn fresh_tag() -> String {
        format!("{:016x}", rand::rng().random::<u64>())
    }

    /// Assembles a fresh in-dialogue request from `d`'s own fields (as
    /// opposed to [`Self::rewrite_forwarded_request`], which rewrites a copy
    /// of somebody else's inbound request). Used for BYE, NOTIFY, re-INVITE.
    fn build_in_dialogue_request(
        &self,
        d: &Dialogue,
        method: rsip::Method,
        local_ep: SocketAddr,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) -> rsip::Request {
        let mut headers: rsip::Headers = Default::default();
        headers.push(rsip::Header::Via(
            format!("SIP/2.0/UDP {};branch={}", local_ep, Self::fresh_branch()).into(),
        ));
        headers.push(rsip::Header::CallId(d.call_id.clone().into()));
        headers.push(
            rsip::typed::To {
                display_name: d.remote_user_field.display_name.clone(),
                uri: d.remote_user_field.uri.clone(),
                params: vec![rsip::Param::Tag(d.remote_tag.clone().into())],
            }
            .into(),
        );
        headers.push(
            rsip::typed::From {
                display_name: d.local_user_field.display_name.clone(),
                uri: d.local_user_field.uri.clone(),
                params: vec![rsip::Param::Tag(d.local_tag.clone().into())],
            }
            .into(),
        );
        headers.push(
            rsip::typed::CSeq {
                seq: d.cseq,
                method: method.clone(),
            }
            .into(),
        );
        headers.push(local_contact(local_ep).into());
        for route in &d.route_set {
            headers.push(rsip::Header::Route(route.clone()));
        }
        headers.push(rsip::Header::MaxForwards(70.into()));
        headers.push(rsip::Header::UserAgent(self.config.user_agent.clone().into()));
        if let Some(ct) = content_type {
            headers.push(rsip::Header::ContentType(ct.to_string().into()));
        }
        headers.push(rsip::Header::ContentLength((body.len() as u32).into()));

        rsip::Request {
            method,
            uri: d.remote_target.clone(),
            version: rsip::Version::V2,
            headers,
            body,
        }
    }

    /// Fires `request` as a non-INVITE transaction and forgets about its
    /// responses past the point they finalize (BYE/NOTIFY dispatch is
    /// best-effort; this crate does not retry or escalate).
    async fn dispatch_non_invite(&self, request: rsip::Request) -> Result<()> {
        let endpoint = self
            .transport
            .get_request_endpoint(&request, None, false)
            .await?
            .ok_or(Error::NotFound("no endpoint resolved for request"))?;
        let (txn_id, mut events) = self.transport.create_non_invite_transaction(request).await?;
        self.transport.send(&txn_id, endpoint).await?;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if matches!(event, TransactionEvent::Removed) {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn send_bye(&self, dialogue: &Dialogue) -> Result<()> {
        let new_cseq = self.next_cseq(dialogue.id, dialogue.cseq)?;
        let local_ep = self.transport.get_default_endpoint(rsip::Transport::Udp);
        let mut d = dialogue.clone();
        d.cseq = new_cseq;
        let request = self.build_in_dialogue_request(&d, rsip::Method::Bye, local_ep, None, Vec::new());
        self.dispatch_non_invite(request).await
    }

    /// NOTIFY carrying REFER progress as a `sipfrag` body.
    pub(crate) async fn send_notify(
        &self,
        dialogue_id: DialogueId,
        sipfrag: &str,
        subscription_state: &str,
    ) -> Result<()> {
        let dialogue = self.get(dialogue_id)?;
        let new_cseq = self.next_cseq(dialogue.id, dialogue.cseq)?;
        let mut d = dialogue;
        d.cseq = new_cseq;
        let local_ep = self.transport.get_default_endpoint(rsip::Transport::Udp);
        let body = sipfrag.as_bytes().to_vec();
        let mut request = self.build_in_dialogue_request(
            &d,
            rsip::Method::Notify,
            local_ep,
            Some("message/sipfrag;version=2.0"),
            body,
        );
        request
            .headers
            .push(rsip::Header::Other("Event".to_string(), "refer".to_string()));
        request.headers.push(rsip::Header::Other(
            "Subscription-State".to_string(),
            subscription_state.to_string(),
        ));
        self.dispatch_non_invite(request).await
    }

    /// Builds a response to `request` against `code`/`reason`, carrying
    /// over Via/To/From/Call-ID/CSeq unchanged (used for REFER's own
    /// 202/400/500 responses).
    fn build_response_for(&self, request: &rsip::Request, code: u16, reason: &str) -> rsip::Response {
        let mut headers: rsip::Headers = Default::default();
        for header in request.headers.iter() {
            if matches!(
                header,
                rsip::Header::Via(_)
                    | rsip::Header::To(_)
                    | rsip::Header::From(_)
                    | rsip::Header::CallId(_)
                    | rsip::Header::CSeq(_)
            ) {
                headers.push(header.clone());
            }
        }
        headers.push(rsip::Header::ContentLength(0.into()));
        rsip::Response {
            status_code: code.into(),
            version: rsip::Version::V2,
            headers,
            body: Vec::new(),
        }
    }

    pub(crate) async fn respond_to_refer(&self, txn: &InboundTransaction, code: u16, reason: &str) -> Result<()> {
        let response = self.build_response_for(&txn.request, code, reason);
        self.transport.respond(txn, response, true).await
    }

    /// Sends a direct BYE to `id`'s own remote target and removes its
    /// record, independent of whether it currently shares a `bridge_id`
    /// with anyone. Used by the attended-transfer and blind-transfer
    /// cleanup steps: by the time these run, the dialogue's peer has often
    /// already been handed to a different bridge, so the peer-notifying
    /// [`Self::call_hungup`] would see it as unbridged and no-op.
    pub(crate) async fn terminate_leg(&self, id: DialogueId, cause: &str) -> Result<()> {
        let dialogue = self.get(id)?;
        if let Err(err) = self.send_bye(&dialogue).await {
            warn!(%err, dialogue_id = %id, "terminate_leg: failed to send BYE");
        }
        if let Some(cdr_id) = dialogue.cdr_id {
            if let Err(err) = self.cdr_store.hungup(&cdr_id, cause) {
                warn!(%err, dialogue_id = %id, "terminate_leg: failed to record cdr hangup");
            }
        }
        if let Err(err) = self.store.delete(&dialogue.id) {
            warn!(%err, dialogue_id = %id, "terminate_leg: failed to delete dialogue row");
        }
        self.monitor
            .record(MonitorEvent::dialogue_removed(&dialogue.owner, cause));
        Ok(())
    }

    /// Mints a fresh `bridge_id` shared by `a` and `b`, bumping and
    /// persisting both CSeqs. The rebridge step of an attended transfer.
    pub(crate) async fn rebridge(&self, a: DialogueId, b: DialogueId) -> Result<(Dialogue, Dialogue)> {
        let mut da = self.get(a)?;
        let mut db = self.get(b)?;
        let bridge_id = BridgeId::new();
        da.bridge_id = Some(bridge_id);
        da.cseq = self.next_cseq(a, da.cseq)?;
        db.bridge_id = Some(bridge_id);
        db.cseq = self.next_cseq(b, db.cseq)?;
        self.store.update(da.clone())?;
        self.store.update(db.clone())?;
        Ok((da, db))
    }

    /// Assigns both dialogues a fresh `bridge_id` and persists them.
    /// Precondition: neither is currently bridged.
    pub async fn create_bridge(&self, a: DialogueId, b: DialogueId, owner: &str) -> Result<()> {
        let mut da = self.get(a)?;
        let mut db = self.get(b)?;
        if da.is_bridged() || db.is_bridged() {
            return Err(Error::InternalFault(
                "create_bridge: one or both dialogues are already bridged".to_string(),
            ));
        }
        let bridge_id = BridgeId::new();
        da.bridge_id = Some(bridge_id);
        db.bridge_id = Some(bridge_id);
        self.store.update(da)?;
        self.store.update(db)?;
        self.monitor
            .record(MonitorEvent::dialogue_created(owner, format!("bridge {bridge_id} created for {a}")));
        self.monitor
            .record(MonitorEvent::dialogue_created(owner, format!("bridge {bridge_id} created for {b}")));
        Ok(())
    }

    /// Tears down a bridged call: BYE to the peer, both CDRs closed, both
    /// dialogue rows deleted. No-ops with a warning if `d` is not bridged.
    /// Every step is best-effort and individually logged.
    pub async fn call_hungup(&self, d: DialogueId, cause: &str) -> Result<()> {
        let dialogue = self.get(d)?;
        let Some(peer) = self.index().get_opposite(&dialogue)? else {
            warn!(dialogue_id = %d, "call_hungup: dialogue is not bridged, no-op");
            return Ok(());
        };

        if let Some(cdr_id) = dialogue.cdr_id {
            if let Err(err) = self.cdr_store.hungup(&cdr_id, cause) {
                warn!(%err, "call_hungup: failed to record local cdr hangup");
            }
        }
        if let Some(cdr_id) = peer.cdr_id {
            if let Err(err) = self.cdr_store.hungup(&cdr_id, &self.config.remote_hangup_cause) {
                warn!(%err, "call_hungup: failed to record peer cdr hangup");
            }
        }

        if let Err(err) = self.send_bye(&peer).await {
            warn!(%err, "call_hungup: failed to send BYE to peer");
        }

        if let Err(err) = self.store.delete(&dialogue.id) {
            warn!(%err, "call_hungup: failed to delete local dialogue row");
        }
        if let Err(err) = self.store.delete(&peer.id) {
            warn!(%err, "call_hungup: failed to delete peer dialogue row");
        }

        self.monitor
            .record(MonitorEvent::dialogue_removed(&dialogue.owner, "call hungup"));
        self.monitor
            .record(MonitorEvent::dialogue_removed(&peer.owner, "call hungup"));
        Ok(())
    }

    /// Copies `txn.request` and rewrites it to ride on the peer leg: fresh
    /// URI, route set, Call-ID, CSeq, To/From, Contact and Via, with
    /// Authorization stripped and User-Agent replaced. `mangle_target` is
    /// the address the SDP `c=` line is rewritten against — the caller
    /// resolves it from `Proxy-Received-From` when present, else the
    /// transport-reported source address.
    fn rewrite_forwarded_request(
        &self,
        peer: &Dialogue,
        request: &rsip::Request,
        local_ep: SocketAddr,
        mangle_target: SocketAddr,
    ) -> rsip::Request {
        let mut headers: rsip::Headers = Default::default();
        for header in request.headers.iter() {
            if matches!(
                header,
                rsip::Header::Route(_)
                    | rsip::Header::CallId(_)
                    | rsip::Header::CSeq(_)
                    | rsip::Header::To(_)
                    | rsip::Header::From(_)
                    | rsip::Header::Via(_)
                    | rsip::Header::Contact(_)
                    | rsip::Header::Authorization(_)
                    | rsip::Header::UserAgent(_)
                    | rsip::Header::ContentLength(_)
            ) {
                continue;
            }
            headers.push(header.clone());
        }

        for route in &peer.route_set {
            headers.push(rsip::Header::Route(route.clone()));
        }
        headers.push(rsip::Header::CallId(peer.call_id.clone().into()));
        headers.push(
            rsip::typed::CSeq {
                seq: peer.cseq,
                method: request.method.clone(),
            }
            .into(),
        );
        headers.push(
            rsip::typed::To {
                display_name: peer.remote_user_field.display_name.clone(),
                uri: peer.remote_user_field.uri.clone(),
                params: vec![rsip::Param::Tag(peer.remote_tag.clone().into())],
            }
            .into(),
        );
        headers.push(
            rsip::typed::From {
                display_name: peer.local_user_field.display_name.clone(),
                uri: peer.local_user_field.uri.clone(),
                params: vec![rsip::Param::Tag(peer.local_tag.clone().into())],
            }
            .into(),
        );
        headers.push(rsip::Header::Via(
            format!("SIP/2.0/UDP {};branch={}", local_ep, Self::fresh_branch()).into(),
        ));
        headers.push(local_contact(local_ep).into());
        headers.push(rsip::Header::UserAgent(self.config.user_agent.clone().into()));

        let mut body = request.body.clone();
        if request.method == rsip::Method::Invite && !body.is_empty() {
            if let Ok(text) = String::from_utf8(body.clone()) {
                let (mangled, changed) = crate::sdp::mangle(&text, &mangle_target.ip().to_string());
                if changed {
                    body = mangled.into_bytes();
                }
            }
        }
        headers.push(rsip::Header::ContentLength((body.len() as u32).into()));

        rsip::Request {
            method: request.method.clone(),
            uri: peer.remote_target.clone(),
            version: rsip::Version::V2,
            headers,
            body,
        }
    }

    /// Forwards an in-dialogue request from `d` across the bridge to its
    /// peer. `remote_ep` is the transport-reported source address, used as
    /// the SDP mangling target only when neither a `Proxy-Received-From`
    /// header on the inbound request nor a previously learned value on the
    /// peer dialogue is available.
    pub async fn forward_in_dialogue(
        &self,
        d: DialogueId,
        txn: InboundTransaction,
        local_ep: SocketAddr,
        remote_ep: SocketAddr,
    ) -> Result<()> {
        let dialogue = self.get(d)?;
        let Some(peer) = self.index().get_opposite(&dialogue)? else {
            self.monitor.record(MonitorEvent::dial_plan_error(
                &dialogue.owner,
                Some(remote_ep),
                "forward_in_dialogue: dialogue has no peer",
            ));
            return Ok(());
        };

        let proxy_received_from = header_value(&txn.request.headers, "Proxy-Received-From")
            .and_then(|v| v.parse::<SocketAddr>().ok());

        let mangle_target = match proxy_received_from {
            Some(addr) => {
                self.store
                    .update_property(&peer.id, DialogueProperty::ProxySendFrom(Some(addr.into())))?;
                addr
            }
            None => peer
                .proxy_send_from
                .as_ref()
                .and_then(|hwp| hwp.to_string().parse::<SocketAddr>().ok())
                .unwrap_or(remote_ep),
        };

        let new_cseq = self.next_cseq(peer.id, peer.cseq)?;
        let mut peer_for_rewrite = peer.clone();
        peer_for_rewrite.cseq = new_cseq;

        let forwarded = self.rewrite_forwarded_request(&peer_for_rewrite, &txn.request, local_ep, mangle_target);

        let endpoint = self.transport.get_request_endpoint(&forwarded, None, false).await?;
        let Some(endpoint) = endpoint else {
            self.monitor.record(MonitorEvent::dial_plan_error(
                &peer.owner,
                None,
                "forward_in_dialogue: no endpoint resolved",
            ));
            return Ok(());
        };

        let is_invite = forwarded.method == rsip::Method::Invite;
        let (forwarded_id, events) = if is_invite {
            self.transport.create_uac_transaction(forwarded).await?
        } else {
            self.transport.create_non_invite_transaction(forwarded).await?
        };

        // Map entry installed before the send, per O2.
        self.txn_map.insert(forwarded_id, txn.id);
        self.transport.send(&forwarded_id, endpoint).await?;
        self.spawn_response_forwarder(forwarded_id, events);

        if let Some(inbound_cseq) = extract_cseq_number(&txn.request) {
            self.store
                .update_property(&d, DialogueProperty::Cseq(inbound_cseq))?;
        }

        Ok(())
    }

    fn spawn_response_forwarder(&self, forwarded_id: TransactionId, mut events: TransactionEventReceiver) {
        let transport = self.transport.clone();
        let txn_map = self.txn_map.clone();
        let user_agent = self.config.user_agent.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransactionEvent::Provisional(response) => {
                        forward_response(&transport, &txn_map, &forwarded_id, response, false, &user_agent).await;
                    }
                    TransactionEvent::Final(response) => {
                        forward_response(&transport, &txn_map, &forwarded_id, response, true, &user_agent).await;
                    }
                    TransactionEvent::Removed => {
                        txn_map.remove(&forwarded_id);
                        break;
                    }
                }
            }
        });
    }

    /// Re-INVITEs `d` with `replacement_sdp`. CDR-disabled: re-INVITEs
    /// never create a new CDR row. The final-response handler is
    /// observability-only — it logs but never mutates dialogue state.
    pub async fn reinvite(&self, d: DialogueId, replacement_sdp: String) -> Result<()> {
        let dialogue = self.get(d)?;
        let new_cseq = self.next_cseq(d, dialogue.cseq)?;
        let mut updated = dialogue.clone();
        updated.cseq = new_cseq;
        let local_ep = self.transport.get_default_endpoint(rsip::Transport::Udp);
        let body = replacement_sdp.into_bytes();
        let request = self.build_in_dialogue_request(
            &updated,
            rsip::Method::Invite,
            local_ep,
            Some("application/sdp"),
            body,
        );

        let endpoint = self.transport.get_request_endpoint(&request, None, false).await?;
        let Some(endpoint) = endpoint else {
            self.monitor
                .record(MonitorEvent::dial_plan_error(&dialogue.owner, None, "reinvite: no endpoint resolved"));
            return Ok(());
        };

        let (_txn_id, mut events) = self.transport.create_uac_transaction(request).await?;
        self.transport.send(&_txn_id, endpoint).await?;

        let store = self.store.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    TransactionEvent::Final(_) => match store.get(&DialoguePredicate::ById(d)) {
                        Ok(Some(_)) => tracing::debug!(dialogue_id = %d, "reinvite final response observed"),
                        Ok(None) => tracing::debug!(dialogue_id = %d, "reinvite final response observed, dialogue gone"),
                        Err(err) => tracing::warn!(%err, "reinvite: failed to re-locate dialogue"),
                    },
                    TransactionEvent::Removed => break,
                    TransactionEvent::Provisional(_) => {}
                }
            }
        });

        Ok(())
    }

    /// A higher layer has answered a new outgoing call that replaces
    /// `dead`. Bridges `orphan` with `answered`, tears down `dead` directly,
    /// then re-INVITEs `orphan` with `answered`'s SDP.
    pub async fn blind_transfer(&self, dead: DialogueId, orphan: DialogueId, answered: Dialogue) -> Result<()> {
        let mut orphan_dialogue = self.get(orphan)?;
        let bridge_id = BridgeId::new();
        orphan_dialogue.bridge_id = Some(bridge_id);
        let mut answered = answered;
        answered.bridge_id = Some(bridge_id);
        let answered_sdp = answered.remote_sdp.clone().unwrap_or_default();

        self.store.update(orphan_dialogue)?;
        self.store.add(answered)?;

        if let Err(err) = self.terminate_leg(dead, "Blind transfer").await {
            warn!(%err, "blind_transfer: failed to terminate dead leg");
        }

        if let Err(err) = self.reinvite(orphan, answered_sdp).await {
            warn!(%err, "blind_transfer: failed to re-INVITE orphan");
        }

        Ok(())
    }
}

fn local_contact(local_ep: SocketAddr) -> rsip::typed::Contact {
    rsip::typed::Contact {
        display_name: None,
        uri: rsip::Uri {
            scheme: Some(rsip::Scheme::Sip),
            auth: None,
            host_with_port: local_ep.into(),
            params: vec![],
            headers: vec![],
        },
        params: vec![],
    }
}

/// Reads the numeric sequence off a CSeq header by its rendered text
/// rather than a typed conversion, since this header's concrete typed
/// shape isn't pinned down by anything in the retrieved corpus.
fn extract_cseq_number(request: &rsip::Request) -> Option<u32> {
    request.headers.iter().find_map(|header| {
        if let rsip::Header::CSeq(raw) = header {
            raw.to_string().split_whitespace().next()?.parse::<u32>().ok()
        } else {
            None
        }
    })
}

/// Reads an arbitrary non-standard header by name, e.g. `Proxy-Received-From`.
fn header_value(headers: &rsip::Headers, name: &str) -> Option<String> {
    headers.iter().find_map(|header| match header {
        rsip::Header::Other(header_name, value) if header_name.eq_ignore_ascii_case(name) => {
            Some(value.clone())
        }
        _ => None,
    })
}

async fn forward_response(
    transport: &Arc<dyn SipTransport>,
    txn_map: &Arc<InDialogueTransactionMap>,
    forwarded_id: &TransactionId,
    response: rsip::Response,
    is_final: bool,
    user_agent: &str,
) {
    let Some(origin_id) = txn_map.origin_of(forwarded_id) else {
        warn!(?forwarded_id, "forward_response: no origin transaction mapped");
        return;
    };
    let Some(origin_txn) = transport.get_transaction(&origin_id) else {
        warn!(?origin_id, "forward_response: origin transaction no longer live");
        return;
    };

    let mut headers: rsip::Headers = Default::default();
    for header in response.headers.iter() {
        if matches!(
            header,
            rsip::Header::Via(_)
                | rsip::Header::To(_)
                | rsip::Header::From(_)
                | rsip::Header::CallId(_)
                | rsip::Header::CSeq(_)
                | rsip::Header::Route(_)
                | rsip::Header::Contact(_)
                | rsip::Header::UserAgent(_)
        ) {
            continue;
        }
        headers.push(header.clone());
    }
    // Via/To/From/Call-ID/CSeq come from the origin request; the route set
    // is immutable within a dialogue and is stripped, never carried on a
    // response.
    for header in origin_txn.request.headers.iter() {
        if matches!(
            header,
            rsip::Header::Via(_)
                | rsip::Header::To(_)
                | rsip::Header::From(_)
                | rsip::Header::CallId(_)
                | rsip::Header::CSeq(_)
        ) {
            headers.push(header.clone());
        }
    }

    let local_ep = transport.get_default_endpoint(rsip::Transport::Udp);
    headers.push(local_contact(local_ep).into());
    headers.push(rsip::Header::UserAgent(user_agent.to_string().into()));

    let mut body = response.body.clone();
    if origin_txn.request.method == rsip::Method::Invite && !body.is_empty() {
        if let Ok(text) = String::from_utf8(body.clone()) {
            let (mangled, changed) = crate::sdp::mangle(&text, &local_ep.ip().to_string());
            if changed {
                body = mangled.into_bytes();
            }
        }
    }
    headers.push(rsip::Header::ContentLength((body.len() as u32).into()));

    let rebuilt = rsip::Response {
        status_code: response.status_code,
        version: response.version,
        headers,
        body,
    };

    if let Err(err) = transport.respond(&origin_txn, rebuilt, is_final).await {
        warn!(%err, "forward_response: failed to dispatch response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryCdrStore, InMemoryDialogueStore, UserField};
    use crate::events::TracingMonitorSink;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    fn uri(s: &str) -> rsip::Uri {
        s.try_into().unwrap()
    }

    fn dialogue(call_id: &str, local_tag: &str, remote_tag: &str, owner: &str) -> Dialogue {
        Dialogue {
            id: DialogueId::new(),
            call_id: call_id.to_string(),
            local_tag: local_tag.to_string(),
            remote_tag: remote_tag.to_string(),
            cseq: 10,
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

    struct RecordingTransport {
        requests: StdMutex<Vec<rsip::Request>>,
        inbound: StdMutex<HashMap<TransactionId, InboundTransaction>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                requests: StdMutex::new(Vec::new()),
                inbound: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SipTransport for RecordingTransport {
        async fn create_uac_transaction(
            &self,
            request: rsip::Request,
        ) -> Result<(TransactionId, TransactionEventReceiver)> {
            self.requests.lock().unwrap().push(request);
            let (_tx, rx) = mpsc::unbounded_channel();
            Ok((TransactionId::new(), rx))
        }

        async fn create_non_invite_transaction(
            &self,
            request: rsip::Request,
        ) -> Result<(TransactionId, TransactionEventReceiver)> {
            self.requests.lock().unwrap().push(request);
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

        async fn respond(
            &self,
            _txn: &InboundTransaction,
            _response: rsip::Response,
            _is_final: bool,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn manager_with(store: Arc<dyn DialogueStore>) -> (DialogueManager, Arc<RecordingTransport>) {
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

    #[tokio::test]
    async fn create_bridge_rejects_already_bridged() {
        let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
        let (manager, _transport) = manager_with(store.clone());
        let mut a = dialogue("a", "L1", "R1", "alice");
        a.bridge_id = Some(BridgeId::new());
        let b = dialogue("b", "L2", "R2", "alice");
        let a_id = a.id;
        let b_id = b.id;
        store.add(a).unwrap();
        store.add(b).unwrap();

        let result = manager.create_bridge(a_id, b_id, "alice").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_hungup_bumps_peer_cseq_and_deletes_both() {
        let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
        let (manager, _transport) = manager_with(store.clone());
        let mut a = dialogue("a", "L1", "R1", "alice");
        a.cseq = 10;
        let mut b = dialogue("b", "L2", "R2", "alice");
        b.cseq = 20;
        let bridge_id = BridgeId::new();
        a.bridge_id = Some(bridge_id);
        b.bridge_id = Some(bridge_id);
        let a_id = a.id;
        let b_id = b.id;
        store.add(a).unwrap();
        store.add(b).unwrap();

        manager.call_hungup(a_id, "user").await.unwrap();

        assert!(store.get(&DialoguePredicate::ById(a_id)).unwrap().is_none());
        assert!(store.get(&DialoguePredicate::ById(b_id)).unwrap().is_none());
    }

    #[tokio::test]
    async fn call_hungup_on_unbridged_is_noop() {
        let store: Arc<dyn DialogueStore> = Arc::new(InMemoryDialogueStore::new());
        let (manager, _transport) = manager_with(store.clone());
        let a = dialogue("a", "L1", "R1", "alice");
        let a_id = a.id;
        store.add(a).unwrap();

        manager.call_hungup(a_id, "user").await.unwrap();

        assert!(store.get(&DialoguePredicate::ById(a_id)).unwrap().is_some());
    }

    #[test]
    fn extract_cseq_number_parses_leading_digits() {
        let request = rsip::Request {
            method: rsip::Method::Invite,
            uri: uri("sip:bob@example.com"),
            version: rsip::Version::V2,
            headers: {
                let mut h: rsip::Headers = Default::default();
                h.push(rsip::Header::CSeq("42 INVITE".to_string().into()));
                h
            },
            body: Vec::new(),
        };
        assert_eq!(extract_cseq_number(&request), Some(42));
    }
}
