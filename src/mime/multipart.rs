//! Splitting multipart bodies at their boundary delimiters.

use memchr::memmem;

/// Splits a multipart body into the raw bytes of its parts.
///
/// A delimiter is `--boundary` at the start of a line, followed by optional
/// padding and the line end. The preamble before the first delimiter and
/// everything after the closing `--boundary--` are discarded, as are parts
/// that are empty or only whitespace. The line break in front of each
/// delimiter belongs to the delimiter, not to the preceding part.
pub fn split_parts<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{}", boundary);
    let delimiter = delimiter.as_bytes();
    let starts: Vec<usize> = memmem::find_iter(body, delimiter)
        .filter(|&ix| is_delimiter_at(body, ix, delimiter.len()))
        .collect();

    let mut parts = Vec::new();
    for (n, &start) in starts.iter().enumerate() {
        let after = &body[start + delimiter.len()..];
        if after.starts_with(b"--") {
            break;
        }
        let end = starts.get(n + 1).cloned().unwrap_or(body.len());
        let segment = &body[start + delimiter.len()..end];
        let segment = strip_trailing_line_break(skip_delimiter_line_end(segment));
        if segment.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        parts.push(segment);
    }
    parts
}

fn is_delimiter_at(body: &[u8], ix: usize, len: usize) -> bool {
    let at_line_start = ix == 0 || body[ix - 1] == b'\n';
    let rest = &body[ix + len..];
    let terminated = match rest.first() {
        None => true,
        Some(&b) => b == b'\r' || b == b'\n' || b == b' ' || b == b'\t' || rest.starts_with(b"--"),
    };
    at_line_start && terminated
}

/// Drops transport padding and the line end that finish a delimiter line.
fn skip_delimiter_line_end(segment: &[u8]) -> &[u8] {
    let padding = segment
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .count();
    let rest = &segment[padding..];
    if rest.starts_with(b"\r\n") {
        &rest[2..]
    } else if rest.starts_with(b"\n") {
        &rest[1..]
    } else {
        rest
    }
}

fn strip_trailing_line_break(segment: &[u8]) -> &[u8] {
    if segment.ends_with(b"\r\n") {
        &segment[..segment.len() - 2]
    } else if segment.ends_with(b"\n") {
        &segment[..segment.len() - 1]
    } else {
        segment
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn simple_split() {
        let body = b"preamble\r\n--XYZ\r\nContent-Type: text/plain\r\n\r\none\r\n\
                     --XYZ  \r\n\r\ntwo\r\n--XYZ--\r\nepilogue\r\n";
        let parts = split_parts(body, "XYZ");
        assert_eq!(2, parts.len());
        assert_eq!(&b"Content-Type: text/plain\r\n\r\none"[..], parts[0]);
        assert_eq!(&b"\r\ntwo"[..], parts[1]);
    }

    #[test]
    fn empty_parts_are_dropped() {
        let parts = split_parts(b"--b\r\n\r\n--b\r\nx\r\n--b--", "b");
        assert_eq!(vec![&b"x"[..]], parts);
    }

    #[test]
    fn longer_boundary_is_not_a_delimiter() {
        let body = b"--outer\r\nA\r\n--outer-inner\r\nB\r\n--outer--\r\n";
        let parts = split_parts(body, "outer");
        assert_eq!(vec![&b"A\r\n--outer-inner\r\nB"[..]], parts);
    }

    #[test]
    fn missing_close_delimiter_keeps_last_part() {
        let parts = split_parts(b"--b\nfirst\n--b\nsecond\n", "b");
        assert_eq!(vec![&b"first"[..], &b"second"[..]], parts);
    }

    #[test]
    fn no_delimiters() {
        assert!(split_parts(b"just some text", "b").is_empty());
    }

    proptest! {
        #[test]
        fn split_then_join_preserves_parts(
            parts in prop::collection::vec("[a-z][a-z0-9 \r\n]{0,40}", 1..6)
        ) {
            let mut body = String::from("preamble\r\n");
            for part in &parts {
                body.push_str("--B\r\n");
                body.push_str(part);
                body.push_str("\r\n");
            }
            body.push_str("--B--\r\n");

            let split: Vec<String> = split_parts(body.as_bytes(), "B")
                .into_iter()
                .map(|p| String::from_utf8(p.to_vec()).unwrap())
                .collect();
            prop_assert_eq!(&parts, &split);
        }
    }
}
