// Append-only message bus over the shared store
//
// Broadcast and directed messages share one log; readers filter by target
// and by their own entry in each message's read set.

pub mod archive;
pub mod bus;
pub mod compaction;
pub mod types;

pub use archive::ArchiveIndexEntry;
pub use bus::MessageBus;
pub use compaction::{compact_heartbeat_entries, drop_expired_entries};
pub use types::{Message, MessageType};
