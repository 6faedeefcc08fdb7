use thiserror::Error;

/// Error reading or writing a DNS message.
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("message is smaller than header size")]
    HeaderTooShort,
    #[error("message has incomplete data")]
    UnexpectedEof,
    #[error("wrong (too short or too long) size of RDATA")]
    WrongRdataLength,
    #[error("label in domain name has unknown label format")]
    UnknownLabelFormat,
    #[error("invalid characters encountered while reading label")]
    LabelIsNotAscii,
    #[error("compression pointer at offset {0} is out of bounds")]
    BadPointer(usize),
    #[error("compression pointers form a loop")]
    PointerLoop,
    #[error("message section {0} holds more than 65535 records")]
    SectionOverflow(&'static str),
    #[error("encoded message is {0} bytes, limit is 65535")]
    MessageTooLong(usize),
    #[error("TXT string is {0} bytes, limit is 255")]
    StringTooLong(usize),
}
