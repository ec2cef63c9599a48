//! Content-Transfer-Encoding and charset decoding.
//!
//! Every function here reports failure as a `Decode` error; callers decide
//! what to fall back to.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use encoding_rs::Encoding;

use super::quoted_printable::qp_decode;
use crate::errors::*;

pub const DEFAULT_CHARSET: &str = "UTF-8";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    Base64,
    QuotedPrintable,
    Unknown(String),
}

impl TransferEncoding {
    pub fn parse(value: &str) -> TransferEncoding {
        let value = value.trim().trim_matches('"');
        if value.eq_ignore_ascii_case("7bit") {
            TransferEncoding::SevenBit
        } else if value.eq_ignore_ascii_case("8bit") {
            TransferEncoding::EightBit
        } else if value.eq_ignore_ascii_case("binary") {
            TransferEncoding::Binary
        } else if value.eq_ignore_ascii_case("base64") {
            TransferEncoding::Base64
        } else if value.eq_ignore_ascii_case("quoted-printable") {
            TransferEncoding::QuotedPrintable
        } else {
            TransferEncoding::Unknown(value.to_owned())
        }
    }
}

/// Strips all whitespace and decodes standard base64.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let cleaned: Vec<u8> = data
        .iter()
        .cloned()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(&cleaned))
        .map_err(|e| ErrorKind::Decode(format!("base64: {}", e)).into())
}

/// Undoes the transfer encoding. 7bit, 8bit and binary content, as well as
/// content without any declared encoding, is passed through byte for byte.
pub fn decode_transfer(encoding: Option<&TransferEncoding>, raw: &[u8]) -> Result<Vec<u8>> {
    match encoding {
        None
        | Some(&TransferEncoding::SevenBit)
        | Some(&TransferEncoding::EightBit)
        | Some(&TransferEncoding::Binary) => Ok(raw.to_vec()),
        Some(&TransferEncoding::Base64) => decode_base64(raw),
        Some(&TransferEncoding::QuotedPrintable) => Ok(qp_decode(raw)),
        Some(&TransferEncoding::Unknown(ref name)) => Err(ErrorKind::Decode(format!(
            "unsupported transfer encoding {:?}",
            name
        ))
        .into()),
    }
}

/// Interprets `bytes` in the named charset. Unknown charsets are an error;
/// malformed sequences within a known charset become U+FFFD.
pub fn decode_charset(charset: &str, bytes: &[u8]) -> Result<String> {
    let label = charset.trim().trim_matches(|c| c == '"' || c == '\'');
    let encoding = Encoding::for_label_no_replacement(label.as_bytes())
        .ok_or_else(|| ErrorKind::Decode(format!("unknown charset {:?}", label)))?;
    let (text, had_errors) = encoding.decode_with_bom_removal(bytes);
    if had_errors {
        debug!("Malformed {} sequences replaced", encoding.name());
    }
    Ok(text.into_owned())
}

/// Whether `bytes` form complete, well-formed text in the named charset.
pub fn decodes_cleanly(charset: &str, bytes: &[u8]) -> bool {
    let label = charset.trim().trim_matches(|c| c == '"' || c == '\'');
    Encoding::for_label_no_replacement(label.as_bytes()).map_or(false, |encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .is_some()
    })
}
