//! RFC 2047 "encoded words" in header values.

use regex::Regex;

use super::content::{decode_base64, decode_charset, decodes_cleanly};
use super::quoted_printable::hex_byte;
use crate::errors::*;

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"=\?([^?\s]+)\?([BbQq])\?([^?\s]*)\?=").unwrap();
}

/// Decodes the transfer encoding of one encoded word's payload.
fn decode_payload(encoding: &str, payload: &str) -> Result<Vec<u8>> {
    match encoding {
        "b" | "B" => decode_base64(payload.as_bytes()),
        _ => decode_q(payload.as_bytes()),
    }
}

/// The "Q" encoding: `_` is a space, `=XX` a byte, and a malformed escape
/// invalidates the whole word.
fn decode_q(payload: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::with_capacity(payload.len());
    let mut ix = 0;
    while ix < payload.len() {
        match payload[ix] {
            b'_' => decoded.push(b' '),
            b'=' => {
                let byte = if ix + 2 < payload.len() {
                    hex_byte(payload[ix + 1], payload[ix + 2])
                } else {
                    None
                };
                match byte {
                    Some(byte) => decoded.push(byte),
                    None => return Err(ErrorKind::Decode("bad Q escape".to_owned()).into()),
                }
                ix += 2;
            }
            b => decoded.push(b),
        }
        ix += 1;
    }
    Ok(decoded)
}

/// Consecutive encoded words in the same charset whose bytes are decoded
/// together. Words are only joined while the bytes so far end inside a
/// character, so a character split across two words survives.
struct Run<'a> {
    charset: &'a str,
    bytes: Vec<u8>,
    start: usize,
    end: usize,
}

impl<'a> Run<'a> {
    fn flush(self, value: &str, out: &mut String) {
        match decode_charset(self.charset, &self.bytes) {
            Ok(text) => out.push_str(&text),
            Err(e) => {
                debug!("Leaving encoded word as is: {}", e);
                out.push_str(&value[self.start..self.end]);
            }
        }
    }
}

/// Decodes every encoded word in a header value.
///
/// Text outside encoded words is copied unchanged, including whitespace
/// between two encoded words. The exception is a word that continues a
/// character left incomplete by the previous word: the two are joined. An
/// encoded word that cannot be decoded (bad payload or unknown charset) is
/// kept verbatim, delimiters included, and does not affect its neighbours.
pub fn decode_header_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending: Option<Run> = None;
    let mut last = 0;

    for caps in ENCODED_WORD.captures_iter(value) {
        let word = match caps.get(0) {
            Some(word) => word,
            None => continue,
        };
        let gap = &value[last..word.start()];
        let charset = caps.get(1).map_or("", |m| m.as_str());
        let encoding = caps.get(2).map_or("", |m| m.as_str());
        let payload = caps.get(3).map_or("", |m| m.as_str());
        // RFC 2231 allows a language suffix: =?charset*lang?...?=
        let charset = charset.split('*').next().unwrap_or(charset);
        last = word.end();

        let bytes = match decode_payload(encoding, payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Leaving encoded word as is: {}", e);
                if let Some(run) = pending.take() {
                    run.flush(value, &mut out);
                }
                out.push_str(gap);
                out.push_str(word.as_str());
                continue;
            }
        };

        let adjacent = gap.chars().all(char::is_whitespace);
        pending = match pending.take() {
            Some(mut run)
                if adjacent
                    && run.charset.eq_ignore_ascii_case(charset)
                    && !decodes_cleanly(run.charset, &run.bytes) =>
            {
                run.bytes.extend_from_slice(&bytes);
                run.end = word.end();
                Some(run)
            }
            Some(run) => {
                run.flush(value, &mut out);
                out.push_str(gap);
                Some(Run {
                    charset: charset,
                    bytes: bytes,
                    start: word.start(),
                    end: word.end(),
                })
            }
            None => {
                out.push_str(gap);
                Some(Run {
                    charset: charset,
                    bytes: bytes,
                    start: word.start(),
                    end: word.end(),
                })
            }
        };
    }

    if let Some(run) = pending.take() {
        run.flush(value, &mut out);
    }
    out.push_str(&value[last..]);
    out
}
