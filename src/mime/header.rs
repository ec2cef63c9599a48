//! Header block splitting, RFC 822 unfolding and the parameterised header
//! values used by MIME (Content-Type, Content-Disposition).

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use memchr::memchr;
use percent_encoding::percent_decode;

use super::content::decode_charset;
use super::encoded_word::decode_header_value;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<HeaderField>,
}

impl Headers {
    /// The first field with the given name, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push_line(&mut self, line: &str) {
        match line.find(':') {
            Some(colon) => self.fields.push(HeaderField {
                name: line[..colon].trim().to_owned(),
                value: line[colon + 1..].trim().to_owned(),
            }),
            None => trace!("Ignoring header line without a colon: {:?}", line),
        }
    }
}

/// A message (or body part) split into its header block and body.
#[derive(Debug)]
pub struct Split<'a> {
    pub headers: Headers,
    /// The header lines as received, each terminated by LF.
    pub raw_header: String,
    pub body: &'a [u8],
}

/// Separates the header block from the body.
///
/// The header ends at the first blank (or whitespace-only) line. A line
/// starting with a space or tab continues the previous field and is joined to
/// it with a single space. Without a blank line the whole input is header and
/// the body is empty.
pub fn split_message(data: &[u8]) -> Split<'_> {
    let mut headers = Headers::default();
    let mut raw_header = String::new();
    let mut current: Option<String> = None;
    let mut body: &[u8] = &[];
    let mut pos = 0;

    while pos < data.len() {
        let end = memchr(b'\n', &data[pos..]).map_or(data.len(), |ix| pos + ix + 1);
        let line = trim_line_end(&data[pos..end]);
        pos = end;

        if line.iter().all(u8::is_ascii_whitespace) {
            body = &data[pos..];
            break;
        }

        let line = String::from_utf8_lossy(line);
        raw_header.push_str(&line);
        raw_header.push('\n');

        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(ref mut field) = current {
                field.push(' ');
                field.push_str(line.trim());
                continue;
            }
        }
        if let Some(field) = current.take() {
            headers.push_line(&field);
        }
        current = Some(line.into_owned());
    }
    if let Some(field) = current.take() {
        headers.push_line(&field);
    }

    Split {
        headers: headers,
        raw_header: raw_header,
        body: body,
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Broad classification of a MIME type, fixed once when a part is parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Multipart,
    Binary,
}

impl ContentKind {
    pub fn of(mime_type: &str) -> ContentKind {
        let main = mime_type.split('/').next().unwrap_or("");
        if main.eq_ignore_ascii_case("text") {
            ContentKind::Text
        } else if main.eq_ignore_ascii_case("multipart") {
            ContentKind::Multipart
        } else {
            ContentKind::Binary
        }
    }
}

/// A header value of the form `value; name=param; name="quoted param"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParamHeader {
    /// The leading value, lowercased (`text/plain`, `attachment`).
    pub value: String,
    /// Parameter names are lowercased; values have their quotes removed.
    pub params: Vec<(String, String)>,
    pub raw: String,
}

impl ParamHeader {
    pub fn parse(raw: &str) -> ParamHeader {
        let mut segments = split_params(raw).into_iter();
        let value = segments
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        let params = segments
            .filter_map(|segment| {
                let eq = segment.find('=')?;
                let name = segment[..eq].trim().to_ascii_lowercase();
                if name.is_empty() {
                    return None;
                }
                Some((name, unquote(segment[eq + 1..].trim())))
            })
            .collect();
        ParamHeader {
            value: value,
            params: params,
            raw: raw.trim().to_owned(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| v.as_str())
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::of(&self.value)
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary").filter(|b| !b.is_empty())
    }

    pub fn charset(&self) -> Option<&str> {
        self.param("charset").filter(|c| !c.is_empty())
    }

    /// A file name carried by parameter `name`, preferring the RFC 2231
    /// `name*` form. Encoded words in the plain form are decoded.
    pub fn file_name(&self, name: &str) -> Option<String> {
        let extended = format!("{}*", name);
        if let Some(text) = self.param(&extended).and_then(decode_rfc2231) {
            return Some(text);
        }
        self.param(name)
            .filter(|n| !n.is_empty())
            .map(decode_header_value)
    }
}

/// Splits on `;` outside of double quotes.
fn split_params(raw: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (ix, c) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&raw[start..ix]);
                start = ix + 1;
            }
            _ => (),
        }
    }
    segments.push(&raw[start..]);
    segments
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') {
        let inner = &value[1..];
        let mut unquoted = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        unquoted.push(next);
                    }
                }
                '"' => break,
                c => unquoted.push(c),
            }
        }
        unquoted
    } else {
        value.trim_matches('\'').to_owned()
    }
}

/// `charset'language'percent-encoded` from RFC 2231.
fn decode_rfc2231(value: &str) -> Option<String> {
    let mut pieces = value.splitn(3, '\'');
    let (charset, encoded) = match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(charset), Some(_), Some(encoded)) => (charset, encoded),
        _ => ("us-ascii", value),
    };
    let bytes: Vec<u8> = percent_decode(encoded.as_bytes()).collect();
    let charset = if charset.is_empty() { "us-ascii" } else { charset };
    decode_charset(charset, &bytes).ok()
}

const ZONED_DATE_FORMATS: &[&str] = &["%a, %d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M:%S %z"];
const LOCAL_DATE_FORMATS: &[&str] = &["%a, %d %b %Y %H:%M:%S", "%d %b %Y %H:%M:%S"];

/// Parses a Date header against RFC 2822 and then a list of looser
/// variants. Dates without a zone are taken as UTC. A trailing comment such
/// as `(CST)` is ignored.
pub fn parse_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let mut value = value.trim();
    if value.ends_with(')') {
        if let Some(open) = value.rfind('(') {
            value = value[..open].trim_end();
        }
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date);
    }
    for format in ZONED_DATE_FORMATS {
        if let Ok(date) = DateTime::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in LOCAL_DATE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(DateTime::<FixedOffset>::from(Utc.from_utc_datetime(&naive)));
        }
    }
    None
}
