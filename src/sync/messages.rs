//! Message deduplication.
//!
//! Matching is deliberately loose: two `fromMe` messages with the same text a
//! few seconds apart are treated as one. A wrong merge of that kind is rare;
//! a missed merge shows the user a duplicate bubble for every optimistic send.

use crate::api::models::{Message, MessageStatus};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

pub const DEFAULT_MATCH_WINDOW_SECS: u64 = 5;

pub fn resolve_id(msg: &Message) -> Option<&str> {
    msg.id.as_deref()
}

fn same_content(a: &Message, b: &Message, window_secs: u64) -> bool {
    a.from_me
        && b.from_me
        && !a.text.is_empty()
        && a.text == b.text
        && a.timestamp.abs_diff(b.timestamp) < window_secs
}

pub fn identical(a: &Message, b: &Message, window_secs: u64) -> bool {
    match (resolve_id(a), resolve_id(b)) {
        (Some(x), Some(y)) if x == y => true,
        _ => same_content(a, b, window_secs),
    }
}

/// Where an incoming message should land in `existing`, if it is a copy of
/// something already there. A `fromMe` message first looks for a `sending`
/// placeholder with the same text, since that is the echo of an optimistic
/// send. `None` means append.
pub fn find_replacement_index(
    existing: &[Message],
    incoming: &Message,
    window_secs: u64,
) -> Option<usize> {
    if incoming.from_me {
        let placeholder = existing
            .iter()
            .position(|m| m.is_placeholder() && !incoming.text.is_empty() && m.text == incoming.text);
        if placeholder.is_some() {
            return placeholder;
        }
    }
    existing
        .iter()
        .position(|m| identical(m, incoming, window_secs))
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum MergeKey<'a> {
    Id(&'a str),
    // Messages without any id can only be recognised by what they say.
    Content {
        from_me: bool,
        timestamp: i64,
        text: &'a str,
    },
}

fn merge_key(msg: &Message) -> MergeKey<'_> {
    match resolve_id(msg) {
        Some(id) => MergeKey::Id(id),
        None => MergeKey::Content {
            from_me: msg.from_me,
            timestamp: msg.timestamp,
            text: &msg.text,
        },
    }
}

/// Bulk merge keyed by resolved id, incoming entries overwriting existing
/// ones. Placeholders are not collapsed here; see [`collapse_placeholders`].
/// The result is sorted ascending by timestamp, ties keeping first-seen order.
pub fn merge(existing: &[Message], incoming: &[Message]) -> Vec<Message> {
    let mut slots: HashMap<MergeKey<'_>, usize> = HashMap::new();
    let mut merged: Vec<Message> = Vec::with_capacity(existing.len() + incoming.len());

    for msg in existing.iter().chain(incoming) {
        match slots.entry(merge_key(msg)) {
            Entry::Occupied(slot) => merged[*slot.get()] = msg.clone(),
            Entry::Vacant(slot) => {
                slot.insert(merged.len());
                merged.push(msg.clone());
            }
        }
    }

    merged.sort_by_key(|m| m.timestamp);
    merged
}

fn is_confirmed(msg: &Message) -> bool {
    msg.from_me && msg.id.is_some() && msg.status != Some(MessageStatus::Sending)
}

/// Drop `sending` placeholders that a confirmed copy now stands for. Each
/// confirmed message retires at most one placeholder, so sending the same
/// text twice in a row keeps both bubbles.
pub fn collapse_placeholders(messages: Vec<Message>, window_secs: u64) -> Vec<Message> {
    let mut retired = vec![false; messages.len()];
    for confirmed in messages.iter().filter(|m| is_confirmed(m)) {
        let hit = messages.iter().enumerate().position(|(i, m)| {
            !retired[i] && m.is_placeholder() && same_content(m, confirmed, window_secs)
        });
        if let Some(i) = hit {
            retired[i] = true;
        }
    }
    messages
        .into_iter()
        .zip(retired)
        .filter_map(|(m, gone)| (!gone).then_some(m))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Replaced(usize),
    Appended(usize),
}

/// One chat's message list.
#[derive(Debug, Clone)]
pub struct MessageLog {
    messages: Vec<Message>,
    window_secs: u64,
    next_local: u64,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_WINDOW_SECS)
    }
}

impl MessageLog {
    pub fn new(window_secs: u64) -> Self {
        Self {
            messages: Vec::new(),
            window_secs,
            next_local: 0,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Single-message path (send echo, one-off event). A match is replaced
    /// where it sits so the bubble does not jump.
    pub fn push(&mut self, msg: Message) -> Pushed {
        let same_id = resolve_id(&msg)
            .and_then(|id| self.messages.iter().position(|m| resolve_id(m) == Some(id)));
        if let Some(idx) = same_id {
            // A poll already brought this message in. A placeholder it stands
            // for may still be around when the clocks disagree.
            let stale = find_replacement_index(&self.messages, &msg, self.window_secs)
                .filter(|&p| p != idx && self.messages[p].is_placeholder());
            self.messages[idx] = msg;
            return match stale {
                Some(p) => {
                    self.messages.remove(p);
                    Pushed::Replaced(if p < idx { idx - 1 } else { idx })
                }
                None => Pushed::Replaced(idx),
            };
        }
        if let Some(idx) = find_replacement_index(&self.messages, &msg, self.window_secs) {
            self.messages[idx] = msg;
            return Pushed::Replaced(idx);
        }
        let at = self.messages.partition_point(|m| m.timestamp <= msg.timestamp);
        self.messages.insert(at, msg);
        Pushed::Appended(at)
    }

    /// Show `text` immediately as a `sending` bubble. Returns its local id.
    pub fn push_optimistic(&mut self, text: &str, now_secs: i64) -> String {
        self.next_local += 1;
        let id = format!("local-{}", self.next_local);
        self.push(Message::local(id.clone(), text, now_secs));
        id
    }

    pub fn mark_failed(&mut self, local_id: &str) -> bool {
        match self
            .messages
            .iter_mut()
            .find(|m| m.is_placeholder() && m.id.as_deref() == Some(local_id))
        {
            Some(msg) => {
                msg.status = Some(MessageStatus::Failed);
                true
            }
            None => false,
        }
    }

    /// Fold a fetched page in. Returns whether the visible list changed.
    pub fn apply_fetch(&mut self, incoming: &[Message]) -> bool {
        let next = collapse_placeholders(merge(&self.messages, incoming), self.window_secs);
        if next == self.messages {
            return false;
        }
        self.messages = next;
        true
    }
}
