use chrono::{DateTime, FixedOffset, Local};
use std::fmt::Write;

use super::content::{self, TransferEncoding, DEFAULT_CHARSET};
use super::encoded_word::decode_header_value;
use super::header::{self, ContentKind, Headers, ParamHeader};
use super::multipart;
use crate::errors::*;
use crate::sink::ByteSink;
use crate::utils::{format_size, strip_html_tags};

/// Multipart bodies nested deeper than this are kept as opaque leaves.
pub const MAX_NESTING: usize = 32;

/// Shown as the body when no part has displayable text.
pub const NO_DISPLAYABLE_CONTENT: &str = "(no displayable content)";

/// One MIME entity. Multipart entities own their children; every other
/// entity carries its decoded content.
#[derive(Clone, Debug)]
pub struct MessagePart {
    mime_type: String,
    full_content_type: Option<String>,
    kind: ContentKind,
    charset: String,
    transfer_encoding: Option<TransferEncoding>,
    raw: Vec<u8>,
    text: Option<String>,
    bytes: Option<Vec<u8>>,
    file_name: Option<String>,
    disposition: Option<String>,
    attachment: bool,
    size: usize,
    boundary: Option<String>,
    children: Vec<MessagePart>,
}

impl MessagePart {
    /// Parses a part from its own header block and body.
    pub fn parse(data: &[u8]) -> MessagePart {
        let split = header::split_message(data);
        MessagePart::from_headers(&split.headers, split.body, 0)
    }

    fn from_headers(headers: &Headers, body: &[u8], depth: usize) -> MessagePart {
        let content_type = headers.get("Content-Type").map(ParamHeader::parse);
        let disposition = headers.get("Content-Disposition").map(ParamHeader::parse);

        let mime_type = content_type
            .as_ref()
            .map(|ct| ct.value.clone())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "text/plain".to_owned());
        let kind = ContentKind::of(&mime_type);
        let charset = content_type
            .as_ref()
            .and_then(ParamHeader::charset)
            .unwrap_or(DEFAULT_CHARSET)
            .to_owned();
        let boundary = match kind {
            ContentKind::Multipart => content_type
                .as_ref()
                .and_then(ParamHeader::boundary)
                .map(str::to_owned),
            _ => None,
        };
        let file_name = disposition
            .as_ref()
            .and_then(|cd| cd.file_name("filename"))
            .or_else(|| content_type.as_ref().and_then(|ct| ct.file_name("name")));
        let attachment = file_name.is_some()
            || disposition
                .as_ref()
                .map_or(false, |cd| cd.raw.to_ascii_lowercase().contains("attachment"));

        let mut part = MessagePart {
            mime_type: mime_type,
            full_content_type: content_type.map(|ct| ct.raw),
            kind: kind,
            charset: charset,
            transfer_encoding: headers
                .get("Content-Transfer-Encoding")
                .map(TransferEncoding::parse),
            raw: trim_end(body).to_vec(),
            text: None,
            bytes: None,
            file_name: file_name,
            disposition: disposition.map(|cd| cd.raw),
            attachment: attachment,
            size: 0,
            boundary: boundary,
            children: Vec::new(),
        };

        match (part.kind, part.boundary.clone()) {
            (ContentKind::Multipart, Some(ref boundary)) if depth < MAX_NESTING => {
                part.children = multipart::split_parts(&part.raw, boundary)
                    .into_iter()
                    .map(|raw| {
                        let split = header::split_message(raw);
                        MessagePart::from_headers(&split.headers, split.body, depth + 1)
                    })
                    .collect();
                if part.children.is_empty() {
                    warn!("No parts delimited by {:?} in multipart body", boundary);
                    part.keep_undecoded();
                }
            }
            (ContentKind::Multipart, _) => {
                warn!("Keeping multipart body undecoded at depth {}", depth);
                part.keep_undecoded();
            }
            _ => part.decode_content(),
        }
        part.size = match (&part.bytes, &part.text) {
            (&Some(ref bytes), _) => bytes.len(),
            (&None, &Some(ref text)) => text.len(),
            (&None, &None) => part.raw.len(),
        };
        part
    }

    fn keep_undecoded(&mut self) {
        self.text = Some(String::from_utf8_lossy(&self.raw).into_owned());
    }

    /// Decodes transfer encoding and charset. Failures are logged and fall
    /// back to the raw content as text.
    fn decode_content(&mut self) {
        let bytes = match content::decode_transfer(self.transfer_encoding.as_ref(), &self.raw) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Keeping {} part undecoded: {}", self.mime_type, e);
                self.keep_undecoded();
                return;
            }
        };

        match self.kind {
            ContentKind::Text => {
                match content::decode_charset(&self.charset, &bytes) {
                    Ok(text) => self.text = Some(text),
                    Err(e) => {
                        warn!("Keeping {} part undecoded: {}", self.mime_type, e);
                        self.keep_undecoded();
                    }
                }
                if self.attachment {
                    self.bytes = Some(bytes);
                }
            }
            ContentKind::Binary | ContentKind::Multipart => self.bytes = Some(bytes),
        }
    }

    /// The lowercased main type, such as `text/plain`.
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The complete Content-Type header value, if there was one.
    pub fn full_content_type(&self) -> Option<&str> {
        self.full_content_type.as_ref().map(String::as_str)
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn is_text(&self) -> bool {
        self.kind == ContentKind::Text
    }

    pub fn is_multipart(&self) -> bool {
        self.kind == ContentKind::Multipart
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn transfer_encoding(&self) -> Option<&TransferEncoding> {
        self.transfer_encoding.as_ref()
    }

    /// The body as received, before any decoding.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_ref().map(String::as_str)
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_ref().map(Vec::as_slice)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_ref().map(String::as_str)
    }

    pub fn disposition(&self) -> Option<&str> {
        self.disposition.as_ref().map(String::as_str)
    }

    pub fn is_attachment(&self) -> bool {
        self.attachment
    }

    /// Size of the decoded content in bytes; the raw size for containers.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn boundary(&self) -> Option<&str> {
        self.boundary.as_ref().map(String::as_str)
    }

    pub fn children(&self) -> &[MessagePart] {
        &self.children
    }

    /// Depth-first list of the parts that carry content: every entity except
    /// the multipart containers that were split into children.
    pub fn leaves(&self) -> Vec<&MessagePart> {
        let mut leaves = Vec::new();
        self.collect_leaves(&mut leaves);
        leaves
    }

    fn collect_leaves<'a>(&'a self, leaves: &mut Vec<&'a MessagePart>) {
        if self.children.is_empty() {
            leaves.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(leaves);
            }
        }
    }
}

fn trim_end(data: &[u8]) -> &[u8] {
    let len = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |ix| ix + 1);
    &data[..len]
}

/// A retrieved message, decoded.
///
/// Built once by `EmailDocument::parse` and never modified afterwards.
#[derive(Clone, Debug)]
pub struct EmailDocument {
    number: u32,
    from: Option<String>,
    from_raw: Option<String>,
    to: Option<String>,
    to_raw: Option<String>,
    subject: Option<String>,
    subject_raw: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    charset: String,
    content_type: Option<String>,
    raw_header: String,
    raw_body: Vec<u8>,
    body: String,
    root: MessagePart,
}

impl EmailDocument {
    /// Parses raw message bytes. This never fails: anything that cannot be
    /// decoded is kept in its raw form.
    pub fn parse(number: u32, data: &[u8]) -> EmailDocument {
        let split = header::split_message(data);
        let headers = &split.headers;
        let raw = |name: &str| headers.get(name).map(str::to_owned);
        let decoded = |name: &str| headers.get(name).map(decode_header_value);

        let date_header = headers.get("Date");
        let date = date_header.and_then(header::parse_date);
        if let (Some(value), None) = (date_header, date) {
            warn!("Unparseable Date header {:?}", value);
        }

        let root = MessagePart::from_headers(headers, split.body, 0);
        let body = if root.is_multipart() {
            composite_body(&root.leaves())
        } else {
            root.text()
                .map(str::to_owned)
                .unwrap_or_else(|| String::from_utf8_lossy(root.raw()).into_owned())
        };

        EmailDocument {
            number: number,
            from: decoded("From"),
            from_raw: raw("From"),
            to: decoded("To"),
            to_raw: raw("To"),
            subject: decoded("Subject"),
            subject_raw: raw("Subject"),
            date: date,
            charset: root.charset().to_owned(),
            content_type: root.full_content_type().map(str::to_owned),
            raw_header: split.raw_header.clone(),
            raw_body: split.body.to_vec(),
            body: body,
            root: root,
        }
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn from(&self) -> Option<&str> {
        self.from.as_ref().map(String::as_str)
    }

    pub fn from_raw(&self) -> Option<&str> {
        self.from_raw.as_ref().map(String::as_str)
    }

    pub fn to(&self) -> Option<&str> {
        self.to.as_ref().map(String::as_str)
    }

    pub fn to_raw(&self) -> Option<&str> {
        self.to_raw.as_ref().map(String::as_str)
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_ref().map(String::as_str)
    }

    pub fn subject_raw(&self) -> Option<&str> {
        self.subject_raw.as_ref().map(String::as_str)
    }

    /// The Date header, or `None` when it is missing or unparseable.
    pub fn date(&self) -> Option<DateTime<FixedOffset>> {
        self.date
    }

    /// The Date header, falling back to the current time.
    pub fn date_or_now(&self) -> DateTime<FixedOffset> {
        self.date.unwrap_or_else(|| Local::now().into())
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_ref().map(String::as_str)
    }

    pub fn is_multipart(&self) -> bool {
        self.root.is_multipart()
    }

    pub fn raw_header(&self) -> &str {
        &self.raw_header
    }

    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// The text to show for the whole message. A single-part message shows
    /// its decoded content as is; a multipart message shows the part chosen
    /// for display.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// The MIME tree, rooted at the message itself.
    pub fn root(&self) -> &MessagePart {
        &self.root
    }

    /// All content-bearing parts, depth-first in order of appearance.
    pub fn parts(&self) -> Vec<&MessagePart> {
        self.root.leaves()
    }

    pub fn attachments(&self) -> Vec<&MessagePart> {
        self.parts()
            .into_iter()
            .filter(|p| p.is_attachment())
            .collect()
    }

    /// A plain-text overview of the message: headers, structure and the
    /// attachment list.
    pub fn summary(&self) -> String {
        let mut info = String::new();
        let _ = writeln!(info, "Message: {}", self.number);
        let _ = writeln!(info, "From: {}", self.from().unwrap_or("(unknown)"));
        let _ = writeln!(info, "To: {}", self.to().unwrap_or("(unknown)"));
        let _ = writeln!(info, "Subject: {}", self.subject().unwrap_or("(no subject)"));
        let _ = writeln!(
            info,
            "Date: {}",
            self.date
                .map(|d| d.format("%Y-%m-%d %H:%M:%S %z").to_string())
                .unwrap_or_else(|| "(unknown)".to_owned())
        );
        if self.is_multipart() {
            let _ = writeln!(info, "Type: {}", self.content_type().unwrap_or(""));
            let _ = writeln!(info, "Parts: {}", self.parts().len());
            let _ = writeln!(info, "Attachments: {}", self.attachments().len());
        } else {
            let _ = writeln!(info, "Charset: {}", self.charset);
        }

        let attachments = self.attachments();
        if !attachments.is_empty() {
            let _ = writeln!(info, "\nAttachments:");
            for (n, att) in attachments.iter().enumerate() {
                let _ = writeln!(
                    info,
                    "{}. {} ({})",
                    n + 1,
                    att.file_name().unwrap_or("(unnamed)"),
                    format_size(att.size() as u64)
                );
            }
        }
        info
    }

    /// Hands the decoded bytes of an attachment to `sink`.
    pub fn save_attachment<S: ByteSink + ?Sized>(
        &self,
        part: &MessagePart,
        sink: &mut S,
    ) -> Result<()> {
        if !part.is_attachment() {
            return Err(ErrorKind::NothingToSave(format!(
                "{} part is not an attachment",
                part.mime_type()
            ))
            .into());
        }
        match part.bytes() {
            Some(bytes) => sink.write_bytes(bytes),
            None => Err(ErrorKind::NothingToSave(format!(
                "attachment {:?} could not be decoded",
                part.file_name().unwrap_or("(unnamed)")
            ))
            .into()),
        }
    }

    /// Hands the summary followed by the body text to `sink`.
    pub fn save_text<S: ByteSink + ?Sized>(&self, sink: &mut S) -> Result<()> {
        let mut text = self.summary();
        text.push_str("\n\n");
        text.push_str(&self.body);
        sink.write_bytes(text.as_bytes())
    }
}

/// Picks the text to display for a multipart message: the first inline
/// non-empty `text/plain` part, else the first inline non-empty text part
/// (with HTML tags stripped), else the raw content of an unsplit container,
/// else a placeholder.
fn composite_body(parts: &[&MessagePart]) -> String {
    let displayable = |p: &&&MessagePart| {
        !p.is_attachment() && p.is_text() && p.text().map_or(false, |t| !t.trim().is_empty())
    };

    if let Some(plain) = parts
        .iter()
        .filter(displayable)
        .find(|p| p.mime_type() == "text/plain")
    {
        return plain.text().unwrap_or("").to_owned();
    }

    if let Some(part) = parts.iter().find(displayable) {
        let text = part.text().unwrap_or("");
        return if part.mime_type() == "text/html" {
            strip_html_tags(text)
        } else {
            text.to_owned()
        };
    }

    // Containers that could not be split still show their raw content.
    parts
        .iter()
        .filter(|p| !p.is_attachment() && p.is_multipart())
        .filter_map(|p| p.text())
        .find(|t| !t.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| NO_DISPLAYABLE_CONTENT.to_owned())
}

#[cfg(test)]
mod test {
    use chrono::Datelike;

    use super::*;

    fn crlf(text: &str) -> Vec<u8> {
        text.replace('\n', "\r\n").into_bytes()
    }

    const MIXED: &str = r#"From: =?UTF-8?Q?Andr=C3=A9?= <andre@example.com>
To: bob@example.com
Subject: Report
Date: Wed, 27 Oct 2021 14:30:00 +0800
Content-Type: multipart/mixed; boundary="outer"

This is a multi-part message in MIME format.
--outer
Content-Type: multipart/alternative; boundary="inner"

--inner
Content-Type: text/plain; charset=ISO-8859-1
Content-Transfer-Encoding: quoted-printable

caf=E9
--inner
Content-Type: text/html; charset=UTF-8

<p>caf&eacute;</p>
--inner--
--outer
Content-Type: application/octet-stream; name="data.bin"
Content-Disposition: attachment; filename="data.bin"
Content-Transfer-Encoding: base64

AAEC/w==
--outer--
"#;

    #[test]
    fn simple_message() {
        let doc = EmailDocument::parse(
            1,
            &crlf("From: a@b\nTo: c@d\nSubject: =?UTF-8?B?5rWL6K+V?=\nDate: Wed, 27 Oct 2021 14:30:00 +0800\n\nhello\n"),
        );
        assert_eq!(1, doc.number());
        assert_eq!(Some("测试"), doc.subject());
        assert_eq!(Some("=?UTF-8?B?5rWL6K+V?="), doc.subject_raw());
        assert_eq!(Some("a@b"), doc.from());
        assert_eq!("hello", doc.body());
        assert_eq!("UTF-8", doc.charset());
        assert!(!doc.is_multipart());
        assert_eq!(1, doc.parts().len());
        assert!(doc.attachments().is_empty());
        assert_eq!(2021, doc.date().unwrap().year());
        assert_eq!(b"hello\r\n", doc.raw_body());
    }

    #[test]
    fn nested_multipart() {
        let doc = EmailDocument::parse(7, &crlf(MIXED));
        assert!(doc.is_multipart());
        assert_eq!(Some("André <andre@example.com>"), doc.from());
        assert_eq!(Some("multipart/mixed; boundary=\"outer\""), doc.content_type());

        let parts = doc.parts();
        let types: Vec<&str> = parts.iter().map(|p| p.mime_type()).collect();
        assert_eq!(
            vec!["text/plain", "text/html", "application/octet-stream"],
            types
        );
        assert_eq!(Some("café"), parts[0].text());
        assert_eq!("ISO-8859-1", parts[0].charset());
        assert_eq!("café", doc.body());

        assert_eq!(2, doc.root().children().len());
        assert_eq!(Some("inner"), doc.root().children()[0].boundary());
    }

    #[test]
    fn attachments_are_decoded() {
        let doc = EmailDocument::parse(7, &crlf(MIXED));
        let attachments = doc.attachments();
        assert_eq!(1, attachments.len());
        let att = attachments[0];
        assert_eq!(Some("data.bin"), att.file_name());
        assert_eq!(Some(&[0u8, 1, 2, 255][..]), att.bytes());
        assert_eq!(4, att.size());
        assert_eq!(ContentKind::Binary, att.kind());

        let mut saved = Vec::new();
        doc.save_attachment(att, &mut saved).unwrap();
        assert_eq!(vec![0u8, 1, 2, 255], saved);

        let not_attachment = doc.parts()[0];
        assert!(doc.save_attachment(not_attachment, &mut saved).is_err());
    }

    #[test]
    fn single_html_part_is_shown_as_is() {
        let doc = EmailDocument::parse(
            2,
            &crlf("Content-Type: text/html; charset=utf-8\n\n<p>Hi <b>there</b></p>\n"),
        );
        assert_eq!("<p>Hi <b>there</b></p>", doc.body());
        assert_eq!(Some("<p>Hi <b>there</b></p>"), doc.parts()[0].text());
    }

    #[test]
    fn empty_single_part_body_stays_empty() {
        let doc = EmailDocument::parse(2, b"Subject: x\r\n\r\n");
        assert_eq!("", doc.body());
        assert_eq!(1, doc.parts().len());
    }

    #[test]
    fn html_alternative_is_stripped() {
        let doc = EmailDocument::parse(
            2,
            &crlf(
                "Content-Type: multipart/alternative; boundary=b\n\n--b\n\
                 Content-Type: text/html\n\n<p>Hi <b>there</b></p>\n--b--\n",
            ),
        );
        assert_eq!("Hi there", doc.body());
    }

    #[test]
    fn multipart_without_delimiters_keeps_its_content() {
        let doc = EmailDocument::parse(
            2,
            &crlf("Content-Type: multipart/mixed; boundary=zz\n\nContent-Type: text/plain\n\nlost text\n"),
        );
        let parts = doc.parts();
        assert_eq!(1, parts.len());
        assert!(parts[0].is_multipart());
        assert_eq!(
            Some("Content-Type: text/plain\r\n\r\nlost text"),
            parts[0].text()
        );
        assert!(doc.body().contains("lost text"));
    }

    #[test]
    fn nothing_displayable() {
        let doc = EmailDocument::parse(
            3,
            &crlf(
                "Content-Type: multipart/mixed; boundary=b\n\n--b\n\
                 Content-Type: image/png\nContent-Disposition: attachment; filename=a.png\n\
                 Content-Transfer-Encoding: base64\n\niVBORw0KGgo=\n--b--\n",
            ),
        );
        assert_eq!(NO_DISPLAYABLE_CONTENT, doc.body());
        assert_eq!(1, doc.attachments().len());
    }

    #[test]
    fn undecodable_text_falls_back_to_raw() {
        let doc = EmailDocument::parse(
            4,
            &crlf("Content-Type: text/plain\nContent-Transfer-Encoding: base64\n\n!!not base64!!\n"),
        );
        assert_eq!("!!not base64!!", doc.body());

        let doc = EmailDocument::parse(
            5,
            &crlf("Content-Type: text/plain; charset=x-bogus\n\nplain words\n"),
        );
        assert_eq!("plain words", doc.body());
    }

    #[test]
    fn missing_content_type_is_utf8_text() {
        let doc = EmailDocument::parse(6, "Subject: hi\n\nnaïve\n".as_bytes());
        assert_eq!("naïve", doc.body());
        assert_eq!("text/plain", doc.parts()[0].mime_type());
        assert_eq!(None, doc.content_type());
    }

    #[test]
    fn gbk_quoted_printable() {
        let doc = EmailDocument::parse(
            8,
            &crlf(
                "Subject: =?GB2312?Q?=D6=D0=CE=C4?=\nContent-Type: text/plain; charset=GBK\n\
                 Content-Transfer-Encoding: quoted-printable\n\n=D6=D0=CE=C4\n",
            ),
        );
        assert_eq!(Some("中文"), doc.subject());
        assert_eq!("中文", doc.body());
    }

    #[test]
    fn bad_date_is_none() {
        let doc = EmailDocument::parse(9, &crlf("Date: someday\n\nx\n"));
        assert_eq!(None, doc.date());
        doc.date_or_now();
    }

    #[test]
    fn deep_nesting_is_capped() {
        let mut body = String::from("innermost\n");
        for level in (0..40).rev() {
            body = format!(
                "Content-Type: multipart/mixed; boundary=b{0}\n\n--b{0}\n{1}\n--b{0}--\n",
                level, body
            );
        }
        let doc = EmailDocument::parse(10, &crlf(&body));
        let parts = doc.parts();
        assert_eq!(1, parts.len());
        assert!(parts[0].is_multipart());
        assert!(doc.body().contains("innermost"));
    }

    #[test]
    fn summary_and_text_export() {
        let doc = EmailDocument::parse(7, &crlf(MIXED));
        let summary = doc.summary();
        assert!(summary.contains("Subject: Report"));
        assert!(summary.contains("Parts: 3"));
        assert!(summary.contains("1. data.bin"));

        let mut saved = Vec::new();
        doc.save_text(&mut saved).unwrap();
        let saved = String::from_utf8(saved).unwrap();
        assert!(saved.starts_with("Message: 7"));
        assert!(saved.ends_with("café"));
    }
}
