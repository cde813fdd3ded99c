//! Message decoding
//!
//! Turns one line of CLI output into a typed [`Message`](crate::types::Message).

mod parser;

pub use parser::{parse_content_block, parse_message, parse_message_value};
