//! Dynamic update construction (RFC 2136).
//!
//! An UPDATE message reuses the four message sections as zone,
//! prerequisite, update and additional data. The zone section carries a
//! single SOA-typed question naming the zone to be updated.

use crate::dns::{class, opcode, rtype, Message, Name, RData, ResourceRecord};
use crate::tsig::TsigSigner;

pub struct UpdateBuilder {
    message: Message,
}

impl UpdateBuilder {
    pub fn new(id: u16, zone: Name) -> UpdateBuilder {
        let mut message = Message::default();
        message.id = id;
        message.flags.opcode = opcode::UPDATE;
        message
            .questions
            .push(ResourceRecord::question(zone, rtype::SOA, class::IN));
        UpdateBuilder { message }
    }

    /// Prerequisite: the name owns no records at all (RFC 2136 §2.4.3).
    pub fn require_absent(mut self, name: Name) -> UpdateBuilder {
        self.message
            .answers
            .push(ResourceRecord::new(name, rtype::ANY, class::NONE, 0, None));
        self
    }

    /// Add a record to the zone.
    pub fn add(mut self, name: Name, rtype: u16, ttl: u32, rdata: RData) -> UpdateBuilder {
        self.message
            .authorities
            .push(ResourceRecord::new(name, rtype, class::IN, ttl, Some(rdata)));
        self
    }

    /// Delete every RRset owned by the name (RFC 2136 §2.5.2).
    pub fn delete_all(mut self, name: Name) -> UpdateBuilder {
        self.message
            .authorities
            .push(ResourceRecord::new(name, rtype::ANY, class::ANY, 0, None));
        self
    }

    /// Delete one record matching the given data (RFC 2136 §2.5.4).
    pub fn delete(mut self, name: Name, rtype: u16, rdata: RData) -> UpdateBuilder {
        self.message
            .authorities
            .push(ResourceRecord::new(name, rtype, class::NONE, 0, Some(rdata)));
        self
    }

    pub fn sign_with(mut self, signer: TsigSigner) -> UpdateBuilder {
        self.message.signer = Some(signer);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}
