//! Quoted-printable transfer encoding (RFC 2045 section 6.7).

use std::io::Write;

const MAX_LINE: usize = 76;

/// Decodes a quoted-printable body.
///
/// Works line by line: a trailing `=` is a soft line break and joins the line
/// with the next one, `=XX` becomes the byte `0xXX`, and any other `=` is kept
/// as is. Hard line breaks (CRLF or LF) come out as LF. This never fails.
pub fn qp_decode(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::with_capacity(data.len());
    let mut lines = data.split(|&b| b'\n' == b).peekable();
    while let Some(line) = lines.next() {
        let last = lines.peek().is_none();
        let line = strip_cr(line);
        if let Some((&b'=', soft)) = line.split_last() {
            decode_line(soft, &mut decoded);
            continue;
        }
        decode_line(line, &mut decoded);
        if !last {
            decoded.push(b'\n');
        }
    }
    decoded
}

/// Encodes `data` as quoted-printable.
///
/// Everything outside printable ASCII, including CR and LF, is escaped, so the
/// output lines are joined by soft breaks only and `qp_decode` restores the
/// input exactly.
pub fn qp_encode(data: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(data.len() + data.len() / 3);
    let mut column = 0;
    for (ix, &b) in data.iter().enumerate() {
        let trailing_space = (b' ' == b || b'\t' == b) && ix + 1 == data.len();
        let literal = !trailing_space && b'=' != b && (b' ' == b || b'\t' == b || b.is_ascii_graphic());
        let width = if literal { 1 } else { 3 };
        // Leave room for the `=` of the soft break.
        if column + width > MAX_LINE - 1 {
            encoded.extend_from_slice(b"=\r\n");
            column = 0;
        }
        if literal {
            encoded.push(b);
        } else {
            let _ = write!(encoded, "={:02X}", b);
        }
        column += width;
    }
    encoded
}

/// Decodes the `=XX` escapes of a single line.
fn decode_line(line: &[u8], out: &mut Vec<u8>) {
    let mut ix = 0;
    while ix < line.len() {
        if b'=' == line[ix] && ix + 2 < line.len() {
            if let Some(byte) = hex_byte(line[ix + 1], line[ix + 2]) {
                out.push(byte);
                ix += 3;
                continue;
            }
        }
        out.push(line[ix]);
        ix += 1;
    }
}

pub(crate) fn hex_byte(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((&b'\r', rest)) => rest,
        _ => line,
    }
}
