use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{Message, MessageType};
use crate::config::BusConfig;
use crate::error::CoordinationResult;
use crate::observability::coordination_metrics;
use crate::store::{decode_log, encode_log_line, keys, update_log, RecordStore};

/// One agent's view of the shared message log
#[derive(Clone)]
pub struct MessageBus {
    pub(super) store: Arc<dyn RecordStore>,
    pub(super) config: BusConfig,
    agent_id: String,
}

impl MessageBus {
    pub fn new(store: Arc<dyn RecordStore>, config: BusConfig, agent_id: &str) -> Self {
        Self {
            store,
            config,
            agent_id: agent_id.to_string(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Append a message; `to = None` broadcasts it.
    ///
    /// Rotation and heartbeat compaction run afterwards on a best-effort
    /// basis and never fail the send.
    pub async fn send(
        &self,
        kind: MessageType,
        payload: serde_json::Value,
        to: Option<&str>,
    ) -> CoordinationResult<Message> {
        let message = Message::new(&self.agent_id, kind, payload, to);
        self.store
            .append(keys::MESSAGES, &encode_log_line(&message)?)
            .await?;
        coordination_metrics().record_message_sent();

        debug!(
            message_id = %message.id,
            from = %message.from,
            to = message.to.as_deref().unwrap_or("*"),
            kind = %message.kind,
            "Message sent"
        );

        self.maintain().await;
        Ok(message)
    }

    /// Unread messages addressed to this agent in log order, optionally only
    /// those newer than `since`
    pub async fn read_messages(&self, since: Option<DateTime<Utc>>) -> CoordinationResult<Vec<Message>> {
        let messages = self.load().await?;
        Ok(messages
            .into_iter()
            .filter(|m| m.is_unread_by(&self.agent_id))
            .filter(|m| since.is_none_or(|since| m.timestamp > since))
            .collect())
    }

    /// Add this agent to the read set of each message in `ids`.
    ///
    /// Returns how many messages were newly marked; marking twice is a no-op.
    pub async fn mark_read(&self, ids: &[String]) -> CoordinationResult<usize> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let agent_id = self.agent_id.as_str();
        let pending = |m: &Message| wanted.contains(m.id.as_str()) && !m.read_by.contains(agent_id);

        if !self.load().await?.iter().any(pending) {
            return Ok(0);
        }

        let (_, marked) = update_log(
            self.store.as_ref(),
            keys::MESSAGES,
            &self.config.rewrite_policy(),
            |messages: &mut Vec<Message>| {
                let mut marked = 0;
                for message in messages.iter_mut().filter(|m| pending(m)) {
                    message.read_by.insert(agent_id.to_string());
                    marked += 1;
                }
                Ok(marked)
            },
        )
        .await?;

        debug!(agent_id = %agent_id, marked, "Marked messages read");
        Ok(marked)
    }

    /// The last `limit` messages of the live log, whoever they are for
    pub async fn peek(&self, limit: usize) -> CoordinationResult<Vec<Message>> {
        let mut messages = self.load().await?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    pub(super) async fn load(&self) -> CoordinationResult<Vec<Message>> {
        let raw = self.store.read(keys::MESSAGES).await?;
        Ok(decode_log(keys::MESSAGES, raw.as_deref()))
    }

    async fn maintain(&self) {
        // One read serves both the rotation check and the heartbeat count
        let raw = match self.store.read(keys::MESSAGES).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "Message log maintenance skipped");
                return;
            }
        };

        if self.needs_rotation(&raw) {
            match self.rotate().await {
                Ok(Some(entry)) => {
                    info!(archive = %entry.archive, messages = entry.message_count, "Rotated message log")
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Message log rotation skipped"),
            }
            return;
        }

        let heartbeats = decode_log::<Message>(keys::MESSAGES, Some(&raw))
            .iter()
            .filter(|m| m.kind == MessageType::Heartbeat)
            .count();
        if heartbeats < self.config.compaction_trigger {
            return;
        }

        if let Err(e) = self.compact_heartbeats().await {
            warn!(error = %e, "Heartbeat compaction skipped");
        }
    }
}
