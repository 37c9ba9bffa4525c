use crate::ids::{BridgeId, CdrId};

/// Call Detail Record. Outlives its dialogue(s); the core never deletes one.
#[derive(Debug, Clone)]
pub struct Cdr {
    pub id: CdrId,
    pub bridge_id: Option<BridgeId>,
    pub hangup_cause: Option<String>,
}

impl Cdr {
    pub fn new(bridge_id: Option<BridgeId>) -> Self {
        Self {
            id: CdrId::new(),
            bridge_id,
            hangup_cause: None,
        }
    }

    pub fn hungup(&mut self, cause: impl Into<String>) {
        self.hangup_cause = Some(cause.into());
    }
}
