pub mod codec;
pub mod header;
mod record;

pub use codec::{decode_record, encode_record};
pub use record::{ChannelRecord, ConsumerReport};
