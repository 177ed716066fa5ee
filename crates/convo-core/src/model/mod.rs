pub mod conversation;
pub mod raw;

pub use conversation::{
    Channel, ConversationRecord, Direction, InvalidValue, MergeGroup, Message, Status,
};
pub use raw::{RawConversation, RecordError};
