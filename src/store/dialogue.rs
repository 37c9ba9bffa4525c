use crate::ids::{BridgeId, CdrId, DialogueId};
use rsip::headers::Route;

/// A display-name + URI pair, the shape of a From/To header's body.
#[derive(Debug, Clone)]
pub struct UserField {
    pub display_name: Option<String>,
    pub uri: rsip::Uri,
}

impl UserField {
    pub fn new(display_name: Option<String>, uri: rsip::Uri) -> Self {
        Self { display_name, uri }
    }

    /// `true` if `needle` appears in the display name or the URI, used by
    /// [`crate::dialog::index::DialogueIndex::get_relaxed`].
    pub fn contains(&self, needle: &str) -> bool {
        self.display_name
            .as_deref()
            .is_some_and(|n| n.contains(needle))
            || self.uri.to_string().contains(needle)
    }
}

/// A peer leg of a confirmed SIP call.
///
/// Created confirmed, mutated only by the [`crate::dialog::manager::DialogueManager`],
/// deleted on hangup.
#[derive(Debug, Clone)]
pub struct Dialogue {
    pub id: DialogueId,
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
    pub cseq: u32,
    pub route_set: Vec<Route>,
    pub remote_target: rsip::Uri,
    pub local_user_field: UserField,
    pub remote_user_field: UserField,
    pub owner: String,
    pub bridge_id: Option<BridgeId>,
    pub cdr_id: Option<CdrId>,
    pub remote_sdp: Option<String>,
    pub proxy_send_from: Option<rsip::HostWithPort>,
}

impl Dialogue {
    pub fn is_bridged(&self) -> bool {
        self.bridge_id.is_some()
    }
}

/// Properties of a [`Dialogue`] that the manager mutates in place via
/// [`crate::store::DialogueStore::update_property`], rather than a
/// read-modify-write of the whole row.
#[derive(Debug, Clone)]
pub enum DialogueProperty {
    Cseq(u32),
    RemoteTag(String),
    BridgeId(Option<BridgeId>),
    CdrId(Option<CdrId>),
    RemoteSdp(Option<String>),
    ProxySendFrom(Option<rsip::HostWithPort>),
}

impl DialogueProperty {
    pub(crate) fn apply(self, dialogue: &mut Dialogue) {
        match self {
            DialogueProperty::Cseq(v) => dialogue.cseq = v,
            DialogueProperty::RemoteTag(v) => dialogue.remote_tag = v,
            DialogueProperty::BridgeId(v) => dialogue.bridge_id = v,
            DialogueProperty::CdrId(v) => dialogue.cdr_id = v,
            DialogueProperty::RemoteSdp(v) => dialogue.remote_sdp = v,
            DialogueProperty::ProxySendFrom(v) => dialogue.proxy_send_from = v,
        }
    }
}
