// Heartbeat compaction and age-based cleanup of the live log
//
// Both rewrite the whole log under compare-and-swap and are safe to skip:
// losing the race to another writer counts as "nothing removed".

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use super::bus::MessageBus;
use super::types::{Message, MessageType};
use crate::error::CoordinationResult;
use crate::observability::coordination_metrics;
use crate::store::{keys, update_log};

/// Keep at most `keep_per_sender` of each sender's most recent heartbeats
/// younger than `ttl`. Other message types are untouched.
pub fn compact_heartbeat_entries(
    messages: &mut Vec<Message>,
    keep_per_sender: usize,
    ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> usize {
    let before = messages.len();
    let mut kept: HashMap<String, usize> = HashMap::new();
    let mut keep = vec![true; messages.len()];

    // Walk newest first so the retained heartbeats are the latest ones
    for (index, message) in messages.iter().enumerate().rev() {
        if message.kind != MessageType::Heartbeat {
            continue;
        }
        let seen = kept.entry(message.from.clone()).or_default();
        if message.age(now) > ttl || *seen >= keep_per_sender {
            keep[index] = false;
        } else {
            *seen += 1;
        }
    }

    let mut flags = keep.into_iter();
    messages.retain(|_| flags.next().unwrap_or(true));
    before - messages.len()
}

/// Drop messages older than `max_age`, heartbeats older than `heartbeat_ttl`
pub fn drop_expired_entries(
    messages: &mut Vec<Message>,
    max_age: chrono::Duration,
    heartbeat_ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> usize {
    let before = messages.len();
    messages.retain(|message| {
        let limit = if message.kind == MessageType::Heartbeat {
            heartbeat_ttl.min(max_age)
        } else {
            max_age
        };
        message.age(now) <= limit
    });
    before - messages.len()
}

impl MessageBus {
    /// Prune heartbeat messages per sender. Returns how many were removed.
    pub async fn compact_heartbeats(&self) -> CoordinationResult<usize> {
        let keep = self.config.heartbeats_per_sender;
        let ttl = self.config.heartbeat_ttl();
        let removed = self
            .rewrite(|messages, now| compact_heartbeat_entries(messages, keep, ttl, now))
            .await?;
        if removed > 0 {
            coordination_metrics().record_compaction(removed);
            info!(removed, "Compacted heartbeat messages");
        }
        Ok(removed)
    }

    /// Drop messages past their retention age. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> CoordinationResult<usize> {
        let max_age = self.config.message_max_age();
        let ttl = self.config.heartbeat_ttl();
        let removed = self
            .rewrite(|messages, now| drop_expired_entries(messages, max_age, ttl, now))
            .await?;
        if removed > 0 {
            info!(removed, "Dropped expired messages");
        }
        Ok(removed)
    }

    async fn rewrite<F>(&self, prune: F) -> CoordinationResult<usize>
    where
        F: Fn(&mut Vec<Message>, DateTime<Utc>) -> usize + Send + Sync,
    {
        let now = Utc::now();
        let mut preview = self.load().await?;
        if prune(&mut preview, now) == 0 {
            return Ok(0);
        }

        let result = update_log(
            self.store.as_ref(),
            keys::MESSAGES,
            &self.config.rewrite_policy(),
            |messages: &mut Vec<Message>| Ok(prune(messages, now)),
        )
        .await;

        match result {
            Ok((_, removed)) => Ok(removed),
            Err(e) if e.is_conflict() => {
                debug!("Message log kept changing, skipping rewrite");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColonyConfig;
    use crate::store::{encode_log, MemoryStore, RecordStore};
    use serde_json::json;
    use std::sync::Arc;

    fn at(from: &str, kind: MessageType, secs_ago: i64, now: DateTime<Utc>) -> Message {
        let mut message = Message::new(from, kind, json!(secs_ago), None);
        message.timestamp = now - chrono::Duration::seconds(secs_ago);
        message
    }

    #[test]
    fn test_compaction_keeps_latest_heartbeats_per_sender() {
        let now = Utc::now();
        let mut messages = vec![
            at("a", MessageType::Heartbeat, 50, now),
            at("a", MessageType::Heartbeat, 40, now),
            at("b", MessageType::Heartbeat, 35, now),
            at("a", MessageType::Broadcast, 30, now),
            at("a", MessageType::Heartbeat, 20, now),
            at("a", MessageType::Heartbeat, 10, now),
        ];

        let removed = compact_heartbeat_entries(&mut messages, 2, chrono::Duration::seconds(300), now);
        assert_eq!(removed, 2);

        let remaining: Vec<(String, serde_json::Value)> = messages
            .iter()
            .map(|m| (m.from.clone(), m.payload.clone()))
            .collect();
        assert_eq!(
            remaining,
            vec![
                ("b".to_string(), json!(35)),
                ("a".to_string(), json!(30)),
                ("a".to_string(), json!(20)),
                ("a".to_string(), json!(10)),
            ]
        );
    }

    #[test]
    fn test_compaction_drops_heartbeats_past_ttl() {
        let now = Utc::now();
        let mut messages = vec![
            at("a", MessageType::Heartbeat, 900, now),
            at("a", MessageType::RequestHelp, 900, now),
            at("a", MessageType::Heartbeat, 5, now),
        ];

        let removed = compact_heartbeat_entries(&mut messages, 3, chrono::Duration::seconds(300), now);
        assert_eq!(removed, 1);
        assert_eq!(messages[0].kind, MessageType::RequestHelp);
    }

    #[test]
    fn test_drop_expired_entries() {
        let now = Utc::now();
        let mut messages = vec![
            at("a", MessageType::Direct, 100_000, now),
            at("a", MessageType::Direct, 1_000, now),
            at("a", MessageType::Heartbeat, 1_000, now),
            at("a", MessageType::Heartbeat, 10, now),
        ];

        let removed = drop_expired_entries(
            &mut messages,
            chrono::Duration::seconds(86_400),
            chrono::Duration::seconds(300),
            now,
        );
        assert_eq!(removed, 2);
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn test_send_triggers_compaction() {
        let store = MemoryStore::new();
        let mut config = ColonyConfig::default().bus;
        config.compaction_trigger = 5;
        config.heartbeats_per_sender = 2;
        let bus = MessageBus::new(Arc::new(store.clone()), config, "agent-a");

        bus.send(MessageType::Broadcast, json!("keep me"), None).await.unwrap();
        for _ in 0..5 {
            bus.send(MessageType::Heartbeat, json!({}), None).await.unwrap();
        }

        let log = bus.peek(100).await.unwrap();
        let heartbeats = log.iter().filter(|m| m.kind == MessageType::Heartbeat).count();
        assert_eq!(heartbeats, 2);
        assert!(log.iter().any(|m| m.payload == json!("keep me")));
    }

    #[tokio::test]
    async fn test_cleanup_without_expired_messages_writes_nothing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let log = encode_log(&[at("a", MessageType::Direct, 10, now)]).unwrap();
        store.write(keys::MESSAGES, &log).await.unwrap();

        let bus = MessageBus::new(Arc::new(store.clone()), ColonyConfig::default().bus, "agent-b");
        assert_eq!(bus.cleanup_expired().await.unwrap(), 0);
        assert_eq!(store.read(keys::MESSAGES).await.unwrap().unwrap(), log);
    }

    #[tokio::test]
    async fn test_cleanup_expired_rewrites_log() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let log = encode_log(&[
            at("a", MessageType::Direct, 200_000, now),
            at("a", MessageType::Direct, 10, now),
        ])
        .unwrap();
        store.write(keys::MESSAGES, &log).await.unwrap();

        let bus = MessageBus::new(Arc::new(store.clone()), ColonyConfig::default().bus, "agent-b");
        assert_eq!(bus.cleanup_expired().await.unwrap(), 1);
        assert_eq!(bus.peek(10).await.unwrap().len(), 1);
    }
}
