use regex::Regex;

use crate::errors::*;
use crate::pop3result::{EmailMetadata, POP3List, POP3Retr, POP3Stat};

lazy_static! {
    static ref STAT_REGEX: Regex = Regex::new(r"^\s*(?P<nmsg>\d+)\s+(?P<size>\d+)").unwrap();
}

fn parse_pair(line: &str) -> Result<(u32, u64)> {
    let cap = STAT_REGEX
        .captures(line)
        .ok_or_else(|| ErrorKind::Decode(format!("expected `<number> <size>`, got {:?}", line)))?;
    let nmsg = cap["nmsg"]
        .parse::<u32>()
        .map_err(|e| ErrorKind::Decode(format!("{:?}: {}", line, e)))?;
    let size = cap["size"]
        .parse::<u64>()
        .map_err(|e| ErrorKind::Decode(format!("{:?}: {}", line, e)))?;
    Ok((nmsg, size))
}

impl POP3Stat {
    /// Parse the text following `+OK` in a STAT response.
    pub fn parse(stat_line: &str) -> Result<POP3Stat> {
        let (nmsg, size) = parse_pair(stat_line)?;
        Ok(POP3Stat {
            num_mails: nmsg,
            mbox_size: size,
        })
    }
}

impl EmailMetadata {
    pub fn parse(line: &str) -> Result<EmailMetadata> {
        let (nmsg, size) = parse_pair(line)?;
        Ok(EmailMetadata {
            msg_id: nmsg,
            msg_size: size,
        })
    }
}

impl POP3List {
    /// Parse the body of a multi-line LIST response.
    pub fn parse(list_data: &[Vec<u8>]) -> Result<POP3List> {
        let mut mbox: Vec<EmailMetadata> = Vec::new();
        for line in list_data.iter() {
            let line = String::from_utf8_lossy(line);
            if line.trim().is_empty() {
                continue;
            }
            mbox.push(EmailMetadata::parse(&line)?);
        }
        Ok(POP3List { mailbox: mbox })
    }

    /// Parse the status text of `LIST <n>`, which carries a single entry.
    pub fn parse_single(status_text: &str) -> Result<POP3List> {
        Ok(POP3List {
            mailbox: vec![EmailMetadata::parse(status_text)?],
        })
    }

    pub fn total_size(&self) -> u64 {
        self.mailbox.iter().map(|m| m.msg_size).sum()
    }
}

impl POP3Retr {
    pub fn parse(msg_id: u32, lines: &[Vec<u8>]) -> POP3Retr {
        let mut data = Vec::with_capacity(lines.iter().map(|l| l.len() + 2).sum());
        for line in lines {
            data.extend_from_slice(line);
            data.extend_from_slice(b"\r\n");
        }
        POP3Retr {
            msg_id: msg_id,
            data: data,
        }
    }
}
