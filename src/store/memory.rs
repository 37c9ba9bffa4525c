use super::{Cdr, CdrPredicate, CdrStore, Dialogue, DialoguePredicate, DialogueProperty, DialogueStore};
use crate::error::{Error, Result};
use crate::ids::{CdrId, DialogueId};
use std::collections::HashMap;
use std::sync::Mutex;

/// Reference [`DialogueStore`] implementation: one mutex-guarded map.
///
/// Single-reader/single-writer consistency within one request is all that's
/// required here; a production deployment backs this trait with whatever
/// durable store it wants — that's out of scope for this core.
#[derive(Default)]
pub struct InMemoryDialogueStore {
    rows: Mutex<HashMap<DialogueId, Dialogue>>,
}

impl InMemoryDialogueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DialogueStore for InMemoryDialogueStore {
    fn add(&self, dialogue: Dialogue) -> Result<()> {
        self.rows.lock().unwrap().insert(dialogue.id, dialogue);
        Ok(())
    }

    fn update(&self, dialogue: Dialogue) -> Result<()> {
        self.rows.lock().unwrap().insert(dialogue.id, dialogue);
        Ok(())
    }

    fn update_property(&self, id: &DialogueId, property: DialogueProperty) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let dialogue = rows
            .get_mut(id)
            .ok_or(Error::NotFound("dialogue not found for update_property"))?;
        property.apply(dialogue);
        Ok(())
    }

    fn delete(&self, id: &DialogueId) -> Result<()> {
        self.rows.lock().unwrap().remove(id);
        Ok(())
    }

    fn get(&self, predicate: &DialoguePredicate) -> Result<Option<Dialogue>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().find(|d| predicate.matches(d)).cloned())
    }

    fn list(&self, predicate: &DialoguePredicate, limit: usize) -> Result<Vec<Dialogue>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|d| predicate.matches(d))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Reference [`CdrStore`] implementation, mirroring [`InMemoryDialogueStore`].
#[derive(Default)]
pub struct InMemoryCdrStore {
    rows: Mutex<HashMap<CdrId, Cdr>>,
}

impl InMemoryCdrStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CdrStore for InMemoryCdrStore {
    fn add(&self, cdr: Cdr) -> Result<()> {
        self.rows.lock().unwrap().insert(cdr.id, cdr);
        Ok(())
    }

    fn get(&self, predicate: &CdrPredicate) -> Result<Option<Cdr>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows.values().find(|c| predicate.matches(c)).cloned())
    }

    fn list(&self, predicate: &CdrPredicate, limit: usize) -> Result<Vec<Cdr>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|c| predicate.matches(c))
            .take(limit)
            .cloned()
            .collect())
    }

    fn hungup(&self, id: &CdrId, cause: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let cdr = rows
            .get_mut(id)
            .ok_or(Error::NotFound("cdr not found for hungup"))?;
        cdr.hungup(cause);
        Ok(())
    }
}
