use crate::error::{Error, Result};
use crate::store::{Dialogue, DialoguePredicate, DialogueStore};
use tracing::warn;

/// Hierarchy of lookups by `(CallId, LocalTag, RemoteTag)` with relaxed
/// fallbacks. Borrows the store rather than owning it, so it
/// stays a thin query layer over whatever store the
/// [`crate::dialog::manager::DialogueManager`] holds.
pub struct DialogueIndex<'a> {
    store: &'a dyn DialogueStore,
}

impl<'a> DialogueIndex<'a> {
    pub fn new(store: &'a dyn DialogueStore) -> Self {
        Self { store }
    }

    /// Strict triple match first; on miss, three relaxed fallbacks in order,
    /// each abandoned unless it names exactly one dialogue.
    pub fn get_by_triple(
        &self,
        call_id: &str,
        local_tag: &str,
        remote_tag: &str,
    ) -> Result<Option<Dialogue>> {
        let strict = DialoguePredicate::ByTriple {
            call_id: call_id.to_string(),
            local_tag: local_tag.to_string(),
            remote_tag: remote_tag.to_string(),
        };
        if let Some(d) = self.unique(&strict)? {
            return Ok(Some(d));
        }

        if let Some(d) = self.unique(&DialoguePredicate::ByLocalTag(local_tag.to_string()))? {
            return Ok(Some(d));
        }

        if let Some(d) = self.unique(&DialoguePredicate::ByRemoteTag(remote_tag.to_string()))? {
            return Ok(Some(d));
        }

        // Call-ID fallback: experimental; abandoned rather than picking an
        // arbitrary candidate on ambiguity.
        self.unique(&DialoguePredicate::ByCallId(call_id.to_string()))
    }

    /// Parses a `Replaces` value of the shape
    /// `<callid>;to-tag=<tag>;from-tag=<tag>` (URI-unescaped first), then
    /// delegates to [`Self::get_by_triple`].
    pub fn get_by_replaces(&self, replaces_value: &str) -> Result<Option<Dialogue>> {
        let decoded = percent_decode(replaces_value);
        let mut parts = decoded.split(';');
        let call_id = parts.next().ok_or_else(|| Error::ParseFault {
            what: "Replaces",
            reason: "missing call-id".to_string(),
        })?;

        let mut to_tag: Option<&str> = None;
        let mut from_tag: Option<&str> = None;
        for param in parts {
            if let Some(v) = param.strip_prefix("to-tag=") {
                to_tag = Some(v);
            } else if let Some(v) = param.strip_prefix("from-tag=") {
                from_tag = Some(v);
            }
        }

        let (to_tag, from_tag) = match (to_tag, from_tag) {
            (Some(t), Some(f)) => (t, f),
            _ => {
                return Err(Error::ParseFault {
                    what: "Replaces",
                    reason: "missing to-tag or from-tag".to_string(),
                })
            }
        };

        self.get_by_triple(call_id, to_tag, from_tag)
    }

    /// Owner-scoped heuristics: treat `identifier` as a Call-ID (strict)
    /// first; on miss, the sole dialogue whose `local_user_field` contains
    /// `identifier`. Ambiguity returns `None`, never an arbitrary pick.
    pub fn get_relaxed(&self, owner: &str, identifier: &str) -> Result<Option<Dialogue>> {
        let strict = DialoguePredicate::ByOwnerAndCallId {
            owner: owner.to_string(),
            call_id: identifier.to_string(),
        };
        if let Some(d) = self.unique(&strict)? {
            return Ok(Some(d));
        }

        let owned = self
            .store
            .list(&DialoguePredicate::ByOwner(owner.to_string()), usize::MAX)?;
        let mut matches = owned
            .into_iter()
            .filter(|d| d.local_user_field.contains(identifier));

        let first = matches.next();
        if matches.next().is_some() {
            warn!(owner, identifier, "get_relaxed: ambiguous match, returning none");
            return Ok(None);
        }
        Ok(first)
    }

    /// The other dialogue sharing `bridge_id`, or `None`.
    pub fn get_opposite(&self, dialogue: &Dialogue) -> Result<Option<Dialogue>> {
        let Some(bridge_id) = dialogue.bridge_id else {
            return Ok(None);
        };
        let peers = self
            .store
            .list(&DialoguePredicate::ByBridgeId(bridge_id), 4)?;
        Ok(peers.into_iter().find(|p| p.id != dialogue.id))
    }

    /// Returns `Some` only when exactly one dialogue matches `predicate`.
    fn unique(&self, predicate: &DialoguePredicate) -> Result<Option<Dialogue>> {
        let mut rows = self.store.list(predicate, 2)?;
        if rows.len() != 1 {
            return Ok(None);
        }
        Ok(rows.pop())
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
