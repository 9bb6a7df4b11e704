// Rotation of the live message log into archive records

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, error, warn};

use super::bus::MessageBus;
use super::types::{Message, MessageType};
use crate::error::CoordinationResult;
use crate::observability::coordination_metrics;
use crate::store::{decode_log, encode_log_line, keys};

/// Summary line appended to the archive index for every rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveIndexEntry {
    /// Record key of the archived log
    pub archive: String,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub message_count: usize,
    pub message_types: BTreeSet<MessageType>,
    pub senders: BTreeSet<String>,
    pub archived_at: DateTime<Utc>,
}

impl ArchiveIndexEntry {
    pub fn summarize(archive: &str, messages: &[Message], archived_at: DateTime<Utc>) -> Self {
        Self {
            archive: archive.to_string(),
            first_timestamp: messages.iter().map(|m| m.timestamp).min(),
            last_timestamp: messages.iter().map(|m| m.timestamp).max(),
            message_count: messages.len(),
            message_types: messages.iter().map(|m| m.kind).collect(),
            senders: messages.iter().map(|m| m.from.clone()).collect(),
            archived_at,
        }
    }
}

fn archive_stamp(now: DateTime<Utc>) -> String {
    let suffix: u16 = rand::rng().random();
    format!("{}-{:04x}", now.format("%Y%m%dT%H%M%S%.3fZ"), suffix)
}

impl MessageBus {
    /// Whether a raw live log is past the size or count threshold
    pub(super) fn needs_rotation(&self, raw: &[u8]) -> bool {
        if raw.len() as u64 > self.config.rotate_max_bytes {
            return true;
        }
        let lines = raw
            .split(|b| *b == b'\n')
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .count();
        lines > self.config.rotate_max_messages
    }

    /// Rotate the live log when it exceeds a threshold
    pub async fn rotate_if_needed(&self) -> CoordinationResult<Option<ArchiveIndexEntry>> {
        let Some(raw) = self.store.read(keys::MESSAGES).await? else {
            return Ok(None);
        };
        if !self.needs_rotation(&raw) {
            return Ok(None);
        }
        self.rotate().await
    }

    /// Move the whole live log into a new archive and leave it empty.
    ///
    /// Returns `None` when there was nothing to archive.
    pub async fn rotate(&self) -> CoordinationResult<Option<ArchiveIndexEntry>> {
        let raw = match self.store.take(keys::MESSAGES).await? {
            Some(raw) if !raw.iter().all(u8::is_ascii_whitespace) => raw,
            _ => {
                debug!("Live message log empty, nothing to rotate");
                return Ok(None);
            }
        };

        let now = Utc::now();
        let archive = keys::archive_key(&archive_stamp(now));
        if let Err(e) = self.store.write(&archive, &raw).await {
            // Put the taken lines back so nothing is lost
            match self.store.append(keys::MESSAGES, &raw).await {
                Ok(()) => warn!(archive = %archive, error = %e, "Archive write failed, live log restored"),
                Err(restore) => error!(
                    archive = %archive,
                    error = %e,
                    restore_error = %restore,
                    bytes = raw.len(),
                    "Archive write failed and the live log could not be restored"
                ),
            }
            return Err(e.into());
        }

        let messages: Vec<Message> = decode_log(&archive, Some(&raw));
        let entry = ArchiveIndexEntry::summarize(&archive, &messages, now);
        self.store
            .append(keys::ARCHIVE_INDEX, &encode_log_line(&entry)?)
            .await?;
        coordination_metrics().record_rotation();

        Ok(Some(entry))
    }

    /// Archive index entries, oldest first
    pub async fn list_archives(&self) -> CoordinationResult<Vec<ArchiveIndexEntry>> {
        let raw = self.store.read(keys::ARCHIVE_INDEX).await?;
        Ok(decode_log(keys::ARCHIVE_INDEX, raw.as_deref()))
    }
}
