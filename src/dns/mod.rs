//! DNS wire codec: messages, resource records and dotted names over a
//! length-aware byte buffer, per RFC 1035 with the UPDATE (RFC 2136),
//! SRV (RFC 2782), TSIG (RFC 2845) and AAAA (RFC 3596) extensions.
//!
//! Reading follows compression pointers; writing always emits plain labels,
//! so a round trip is size-preserving only up to canonicalization of
//! compressed inputs.

mod error;
mod message;
mod name;
mod rdata;
mod reader;
mod writer;

pub use error::DnsError;
pub use message::{Flags, Message, ResourceRecord};
pub use name::Name;
pub use rdata::RData;
pub use reader::Reader;
pub use writer::Writer;

/// Fixed size of the message header.
pub const HEADER_LEN: usize = 12;
/// Hard limit on an encoded message, from the 16-bit TCP length prefix.
pub const MAX_MESSAGE_LEN: usize = 65535;
/// Largest payload sent over UDP before switching to TCP.
pub const MAX_UDP_LEN: usize = 512;

/// Record type numbers.
pub mod rtype {
    pub const A: u16 = 1;
    pub const NS: u16 = 2;
    pub const CNAME: u16 = 5;
    pub const SOA: u16 = 6;
    pub const PTR: u16 = 12;
    pub const MX: u16 = 15;
    pub const TXT: u16 = 16;
    pub const AAAA: u16 = 28;
    pub const SRV: u16 = 33;
    pub const OPT: u16 = 41;
    pub const TSIG: u16 = 250;
    pub const ANY: u16 = 255;
}

/// Record class numbers.
pub mod class {
    pub const IN: u16 = 1;
    /// RFC 2136 "name is not in use" prerequisites and RRset deletions.
    pub const NONE: u16 = 254;
    pub const ANY: u16 = 255;
}

/// Header opcodes.
pub mod opcode {
    pub const QUERY: u8 = 0;
    pub const STATUS: u8 = 2;
    pub const NOTIFY: u8 = 4;
    pub const UPDATE: u8 = 5;
}

/// Response codes.
pub mod rcode {
    pub const NOERROR: u8 = 0;
    pub const FORMERR: u8 = 1;
    pub const SERVFAIL: u8 = 2;
    pub const NXDOMAIN: u8 = 3;
    pub const NOTIMP: u8 = 4;
    pub const REFUSED: u8 = 5;
    pub const YXDOMAIN: u8 = 6;
    pub const YXRRSET: u8 = 7;
    pub const NXRRSET: u8 = 8;
    pub const NOTAUTH: u8 = 9;
    pub const NOTZONE: u8 = 10;
}
