//! Decoding of retrieved messages: headers, encoded words, transfer
//! encodings, charsets and the multipart tree.

pub mod content;
pub mod encoded_word;
pub mod header;
pub mod message;
pub mod multipart;
pub mod quoted_printable;

pub use self::message::{EmailDocument, MessagePart};
