use crate::api::models::Chat;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChanges {
    pub added: Vec<Chat>,
    pub updated: Vec<Chat>,
    pub removed: Vec<String>,
}

impl ChatChanges {
    /// An empty change set means callers can skip re-applying and re-rendering.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }
}

fn changed(old: &Chat, new: &Chat) -> bool {
    old.last_message != new.last_message
        || old.timestamp != new.timestamp
        || old.unread_count != new.unread_count
        || old.is_typing != new.is_typing
        || old.name != new.name
}

/// Compare two snapshots by chat id. Later duplicates of an id inside one
/// snapshot win, and each id is reported at most once.
pub fn diff(old_chats: &[Chat], new_chats: &[Chat]) -> ChatChanges {
    let old_by_id: HashMap<&str, &Chat> = old_chats.iter().map(|c| (c.id.as_str(), c)).collect();
    let new_by_id: HashMap<&str, &Chat> = new_chats.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut changes = ChatChanges::default();
    let mut seen: HashSet<&str> = HashSet::new();
    for chat in new_chats {
        if !seen.insert(chat.id.as_str()) {
            continue;
        }
        let latest = new_by_id[chat.id.as_str()];
        match old_by_id.get(chat.id.as_str()) {
            None => changes.added.push(latest.clone()),
            Some(old) if changed(old, latest) => changes.updated.push(latest.clone()),
            Some(_) => {}
        }
    }

    let mut gone: HashSet<&str> = HashSet::new();
    for chat in old_chats {
        let id = chat.id.as_str();
        if !new_by_id.contains_key(id) && gone.insert(id) {
            changes.removed.push(chat.id.clone());
        }
    }

    changes
}

/// Produce the next canonical snapshot: removals dropped, updates replaced
/// wholesale, additions appended, then sorted newest first.
pub fn apply(current: &[Chat], changes: &ChatChanges) -> Vec<Chat> {
    let removed: HashSet<&str> = changes.removed.iter().map(String::as_str).collect();
    let updated: HashMap<&str, &Chat> = changes
        .updated
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect();

    let mut next: Vec<Chat> = current
        .iter()
        .filter(|c| !removed.contains(c.id.as_str()))
        .map(|c| match updated.get(c.id.as_str()) {
            Some(fresh) => (*fresh).clone(),
            None => c.clone(),
        })
        .collect();
    next.extend(changes.added.iter().cloned());
    sort_for_display(&mut next);
    next
}

pub fn sort_for_display(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Owned chat list that only changes through a reconciliation cycle.
#[derive(Debug, Clone, Default)]
pub struct ChatSnapshot {
    chats: Vec<Chat>,
}

impl ChatSnapshot {
    pub fn new(mut chats: Vec<Chat>) -> Self {
        sort_for_display(&mut chats);
        Self { chats }
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn get(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    /// What a freshly fetched list would change, without applying it.
    pub fn diff(&self, fetched: &[Chat]) -> ChatChanges {
        diff(&self.chats, fetched)
    }

    pub fn commit(&mut self, changes: &ChatChanges) {
        if !changes.is_empty() {
            self.chats = apply(&self.chats, changes);
        }
    }

    /// Diff against a freshly fetched list and apply it. Returns the change
    /// set so callers can persist or render just the delta.
    pub fn reconcile(&mut self, fetched: &[Chat]) -> ChatChanges {
        let changes = self.diff(fetched);
        self.commit(&changes);
        changes
    }
}
