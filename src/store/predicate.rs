use super::{Cdr, Dialogue};
use crate::ids::{BridgeId, CdrId};

/// Compound predicate over [`Dialogue`] attributes, supporting lookups by
/// id, tag triple, call-id, bridge, or owner.
#[derive(Debug, Clone)]
pub enum DialoguePredicate {
    ById(crate::ids::DialogueId),
    ByTriple {
        call_id: String,
        local_tag: String,
        remote_tag: String,
    },
    ByLocalTag(String),
    ByRemoteTag(String),
    ByCallId(String),
    ByBridgeId(BridgeId),
    ByOwnerAndCallId { owner: String, call_id: String },
    ByOwner(String),
    And(Box<DialoguePredicate>, Box<DialoguePredicate>),
}

impl DialoguePredicate {
    pub fn and(self, other: DialoguePredicate) -> DialoguePredicate {
        DialoguePredicate::And(Box::new(self), Box::new(other))
    }

    pub fn matches(&self, d: &Dialogue) -> bool {
        match self {
            DialoguePredicate::ById(id) => d.id == *id,
            DialoguePredicate::ByTriple {
                call_id,
                local_tag,
                remote_tag,
            } => &d.call_id == call_id && &d.local_tag == local_tag && &d.remote_tag == remote_tag,
            DialoguePredicate::ByLocalTag(tag) => &d.local_tag == tag,
            DialoguePredicate::ByRemoteTag(tag) => &d.remote_tag == tag,
            DialoguePredicate::ByCallId(call_id) => &d.call_id == call_id,
            DialoguePredicate::ByBridgeId(bridge_id) => d.bridge_id == Some(*bridge_id),
            DialoguePredicate::ByOwnerAndCallId { owner, call_id } => {
                &d.owner == owner && &d.call_id == call_id
            }
            DialoguePredicate::ByOwner(owner) => &d.owner == owner,
            DialoguePredicate::And(a, b) => a.matches(d) && b.matches(d),
        }
    }
}

/// Predicate over [`Cdr`] rows. CDRs are looked up far less often than
/// dialogues, so the predicate surface stays small.
#[derive(Debug, Clone)]
pub enum CdrPredicate {
    ById(CdrId),
    ByBridgeId(BridgeId),
}

impl CdrPredicate {
    pub fn matches(&self, c: &Cdr) -> bool {
        match self {
            CdrPredicate::ById(id) => c.id == *id,
            CdrPredicate::ByBridgeId(bridge_id) => c.bridge_id == Some(*bridge_id),
        }
    }
}
