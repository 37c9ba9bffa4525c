use crate::ids::TransactionId;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local mapping from forwarded-transaction-id to origin-transaction-id.
///
/// Entries are inserted when the manager emits a forwarded request and
/// removed when the SIP transport finalizes that transaction. Every
/// operation takes the lock: insert/remove/containment checks all happen
/// under one mutex.
#[derive(Default)]
pub struct InDialogueTransactionMap {
    inner: Mutex<HashMap<TransactionId, TransactionId>>,
}

impl InDialogueTransactionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, forwarded: TransactionId, origin: TransactionId) {
        self.inner.lock().unwrap().insert(forwarded, origin);
    }

    pub fn origin_of(&self, forwarded: &TransactionId) -> Option<TransactionId> {
        self.inner.lock().unwrap().get(forwarded).copied()
    }

    pub fn remove(&self, forwarded: &TransactionId) {
        self.inner.lock().unwrap().remove(forwarded);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_then_remove() {
        let map = InDialogueTransactionMap::new();
        let forwarded = TransactionId::new();
        let origin = TransactionId::new();
        map.insert(forwarded, origin);
        assert_eq!(map.origin_of(&forwarded), Some(origin));
        map.remove(&forwarded);
        assert_eq!(map.origin_of(&forwarded), None);
        assert_eq!(map.len(), 0);
    }
}
