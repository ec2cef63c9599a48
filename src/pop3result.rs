#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmailMetadata {
    pub msg_id: u32,
    pub msg_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct POP3Stat {
    pub num_mails: u32,
    pub mbox_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct POP3List {
    pub mailbox: Vec<EmailMetadata>,
}

/// The raw bytes of a retrieved message, lines joined with CRLF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct POP3Retr {
    pub msg_id: u32,
    pub data: Vec<u8>,
}
