//! The concrete sync operation the poller drives: fetch, reconcile, persist,
//! and report the delta.

use crate::api::client::ApiClient;
use crate::api::models::{Chat, Message};
use crate::app::SyncSettings;
use crate::error::SyncError;
use crate::storage::ChatCache;
use crate::sync::chats::{ChatChanges, ChatSnapshot};
use crate::sync::messages::{MessageLog, Pushed};
use crate::sync::scheduler::Syncer;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Chats(ChatChanges),
    Messages { chat_id: String, messages: Vec<Message> },
}

pub struct ChatSync {
    client: ApiClient,
    settings: SyncSettings,
    snapshot: Mutex<ChatSnapshot>,
    cache: Option<Mutex<ChatCache>>,
    logs: Mutex<HashMap<String, MessageLog>>,
    events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // State stays consistent across a panicking reader; keep going.
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatSync {
    pub fn new(client: ApiClient, settings: SyncSettings) -> Self {
        Self {
            client,
            settings,
            snapshot: Mutex::new(ChatSnapshot::default()),
            cache: None,
            logs: Mutex::new(HashMap::new()),
            events: None,
        }
    }

    /// Seed the snapshot from the cache and keep persisting into it.
    pub fn with_cache(mut self, cache: ChatCache) -> Result<Self, SyncError> {
        let cached = cache.load(None)?;
        if !cached.is_empty() {
            info!("loaded {} cached chats", cached.len());
        }
        self.snapshot = Mutex::new(ChatSnapshot::new(cached));
        self.cache = Some(Mutex::new(cache));
        Ok(self)
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Also poll this chat's messages on every cycle.
    pub fn track(&self, chat_id: &str) {
        lock(&self.logs)
            .entry(chat_id.to_string())
            .or_insert_with(|| MessageLog::new(self.settings.match_window_secs));
    }

    pub fn chats(&self) -> Vec<Chat> {
        lock(&self.snapshot).chats().to_vec()
    }

    pub fn messages(&self, chat_id: &str) -> Option<Vec<Message>> {
        lock(&self.logs).get(chat_id).map(|log| log.messages().to_vec())
    }

    /// Optimistically show `text` and send it. The placeholder is replaced by
    /// the server's copy on success and marked failed otherwise.
    pub async fn send_text(&self, chat_id: &str, text: &str, now_secs: i64) -> Result<Message, SyncError> {
        self.track(chat_id);
        let local_id = {
            let mut logs = lock(&self.logs);
            let log = logs
                .get_mut(chat_id)
                .ok_or_else(|| SyncError::other(format!("chat {chat_id} is not tracked")))?;
            log.push_optimistic(text, now_secs)
        };
        self.emit_messages(chat_id);

        match self.client.send_text(chat_id, text, &local_id).await {
            Ok(sent) => {
                if let Some(log) = lock(&self.logs).get_mut(chat_id) {
                    if let Pushed::Appended(_) = log.push(sent.clone()) {
                        debug!("send confirmation for {chat_id} did not match a placeholder");
                    }
                }
                self.emit_messages(chat_id);
                Ok(sent)
            }
            Err(err) => {
                if let Some(log) = lock(&self.logs).get_mut(chat_id) {
                    log.mark_failed(&local_id);
                }
                self.emit_messages(chat_id);
                Err(err.into())
            }
        }
    }

    async fn sync_chats(&self) -> Result<(), SyncError> {
        let fetched = self.client.chats(self.settings.chat_limit).await?;
        if let Some(changes) = self.commit_chats(&fetched)? {
            self.emit(SyncEvent::Chats(changes));
        }
        Ok(())
    }

    // The snapshot only moves once the cache has the same delta, so a failed
    // write is retried by the next cycle's diff.
    fn commit_chats(&self, fetched: &[Chat]) -> Result<Option<ChatChanges>, SyncError> {
        let mut snapshot = lock(&self.snapshot);
        let changes = snapshot.diff(fetched);
        if changes.is_empty() {
            debug!("chat list unchanged ({} chats)", fetched.len());
            return Ok(None);
        }
        info!(
            "chats: {} added, {} updated, {} removed",
            changes.added.len(),
            changes.updated.len(),
            changes.removed.len()
        );
        if let Some(cache) = &self.cache {
            lock(cache).apply_changes(&changes)?;
        }
        snapshot.commit(&changes);
        Ok(Some(changes))
    }

    async fn sync_messages(&self, chat_id: &str) -> Result<(), SyncError> {
        let page = self.client.messages(chat_id, self.settings.message_limit).await?;
        let changed = match lock(&self.logs).get_mut(chat_id) {
            Some(log) => log.apply_fetch(&page),
            None => false,
        };
        if changed {
            self.emit_messages(chat_id);
        }
        Ok(())
    }

    fn emit_messages(&self, chat_id: &str) {
        if let Some(messages) = self.messages(chat_id) {
            self.emit(SyncEvent::Messages {
                chat_id: chat_id.to_string(),
                messages,
            });
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                debug!("sync event dropped: no listener");
            }
        }
    }
}

#[async_trait]
impl Syncer for ChatSync {
    async fn sync(&self) -> Result<(), SyncError> {
        self.sync_chats().await?;

        let tracked: Vec<String> = lock(&self.logs).keys().cloned().collect();
        let mut first_err = None;
        for chat_id in tracked {
            if let Err(err) = self.sync_messages(&chat_id).await {
                warn!("message sync for {chat_id} failed: {err}");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
