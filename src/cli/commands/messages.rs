use anyhow::Result;
use chrono::{DateTime, Utc};

use super::{parse_payload, short_time, Command, Context};
use crate::cli::BusAction;
use crate::messaging::{Message, MessageBus, MessageType};

/// Identity used for bus maintenance when no agent is given
const MAINTENANCE_ID: &str = "colony-cli";

fn print_message(message: &Message) {
    let target = message.to.as_deref().unwrap_or("*");
    println!(
        "  📨 {} {} → {} [{}] {}",
        short_time(&message.timestamp),
        message.from,
        target,
        message.kind,
        message.payload
    );
    println!("     id: {}", message.id);
}

pub struct SendCommand {
    pub payload: String,
    pub to: Option<String>,
    pub kind: MessageType,
}

impl Command for SendCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.session().await?;
        let result = session
            .send(self.kind, parse_payload(&self.payload), self.to.as_deref())
            .await;
        ctx.emit(result, |message| {
            match &message.to {
                Some(to) => println!("✉️  Sent {} to {to}", message.kind),
                None => println!("📣 Broadcast {}", message.kind),
            }
            println!("   id: {}", message.id);
        })
    }
}

pub struct ReadCommand {
    pub since: Option<DateTime<Utc>>,
    pub mark: bool,
}

impl Command for ReadCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.session().await?;
        let messages = match session.read_messages(self.since).await {
            Ok(messages) => messages,
            Err(e) => return ctx.emit(Err::<(), _>(e), |_| {}),
        };

        if self.mark && !messages.is_empty() {
            let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
            if let Err(e) = session.mark_read(&ids).await {
                return ctx.emit(Err::<(), _>(e), |_| {});
            }
        }

        ctx.emit(Ok(messages), |messages| {
            if messages.is_empty() {
                println!("📭 No unread messages");
                return;
            }
            println!("📬 {} unread message(s)", messages.len());
            for message in messages {
                print_message(message);
            }
            if !self.mark {
                println!();
                println!("💡 Mark them read with: colony read --mark");
            }
        })
    }
}

pub struct MarkReadCommand {
    pub ids: Vec<String>,
}

impl Command for MarkReadCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let session = ctx.session().await?;
        let result = session.mark_read(&self.ids).await;
        ctx.emit(result, |marked| {
            println!("✅ Marked {marked} message(s) read");
        })
    }
}

pub struct BusCommand {
    pub action: BusAction,
}

impl Command for BusCommand {
    async fn execute(&self, ctx: &Context) -> Result<()> {
        let bus = MessageBus::new(
            ctx.store.clone(),
            ctx.config.bus.clone(),
            ctx.agent.as_deref().unwrap_or(MAINTENANCE_ID),
        );

        match &self.action {
            BusAction::Rotate { force } => {
                let result = if *force {
                    bus.rotate().await
                } else {
                    bus.rotate_if_needed().await
                };
                ctx.emit(result, |entry| match entry {
                    Some(entry) => {
                        println!("📦 Archived {} message(s) to {}", entry.message_count, entry.archive)
                    }
                    None => println!("✨ Message log is within its limits, nothing archived"),
                })
            }
            BusAction::Compact => {
                let result = bus.compact_heartbeats().await;
                ctx.emit(result, |removed| {
                    println!("🧹 Compacted {removed} heartbeat message(s)");
                })
            }
            BusAction::Cleanup => {
                let result = bus.cleanup_expired().await;
                ctx.emit(result, |removed| {
                    println!("🧹 Dropped {removed} expired message(s)");
                })
            }
            BusAction::Archives => {
                let result = bus.list_archives().await;
                ctx.emit(result, |archives| {
                    if archives.is_empty() {
                        println!("📭 No archived logs");
                        return;
                    }
                    println!("📦 ARCHIVED LOGS ({})", archives.len());
                    for entry in archives {
                        println!(
                            "  {} {} message(s), {} sender(s), archived {}",
                            entry.archive,
                            entry.message_count,
                            entry.senders.len(),
                            short_time(&entry.archived_at)
                        );
                    }
                })
            }
            BusAction::Tail { limit } => {
                let result = bus.peek(*limit).await;
                ctx.emit(result, |messages| {
                    if messages.is_empty() {
                        println!("📭 Message log is empty");
                    }
                    for message in messages {
                        print_message(message);
                    }
                })
            }
        }
    }
}
