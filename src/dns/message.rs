use super::name::Name;
use super::rdata::RData;
use super::reader::Reader;
use super::writer::Writer;
use super::{opcode, DnsError, HEADER_LEN, MAX_MESSAGE_LEN};
use crate::tsig::TsigSigner;

/// The DNS header flag word, unpacked.
///
/// All bits default to zero, which is also what an update builder that never
/// touches them gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
}

impl Flags {
    pub fn to_u16(self) -> u16 {
        (self.qr as u16) << 15
            | ((self.opcode & 0x0f) as u16) << 11
            | (self.aa as u16) << 10
            | (self.tc as u16) << 9
            | (self.rd as u16) << 8
            | (self.ra as u16) << 7
            | ((self.z & 0x07) as u16) << 4
            | (self.rcode & 0x0f) as u16
    }

    pub fn from_u16(word: u16) -> Flags {
        Flags {
            qr: word & 0x8000 != 0,
            opcode: (word >> 11) as u8 & 0x0f,
            aa: word & 0x0400 != 0,
            tc: word & 0x0200 != 0,
            rd: word & 0x0100 != 0,
            ra: word & 0x0080 != 0,
            z: (word >> 4) as u8 & 0x07,
            rcode: word as u8 & 0x0f,
        }
    }
}

/// One resource record in any message section.
///
/// Question records carry `{name, rtype, class}` only; their `ttl` is zero
/// and `rdata` is `None`, and neither is put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: Name,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Option<RData>,
}

impl ResourceRecord {
    pub fn new(name: Name, rtype: u16, class: u16, ttl: u32, rdata: Option<RData>) -> Self {
        ResourceRecord {
            name,
            rtype,
            class,
            ttl,
            rdata,
        }
    }

    pub fn question(name: Name, rtype: u16, class: u16) -> Self {
        ResourceRecord::new(name, rtype, class, 0, None)
    }

    fn write_question(&self, w: &mut Writer) {
        w.write_name(&self.name);
        w.write_u16(self.rtype);
        w.write_u16(self.class);
    }

    fn write(&self, w: &mut Writer) -> Result<(), DnsError> {
        w.write_name(&self.name);
        w.write_u16(self.rtype);
        w.write_u16(self.class);
        w.write_u32(self.ttl);
        let size_offset = w.len();
        w.write_u16(0);
        let data_offset = w.len();
        if let Some(rdata) = &self.rdata {
            rdata.write(w)?;
        }
        w.patch_u16(size_offset, (w.len() - data_offset) as u16);
        Ok(())
    }

    fn read_question(r: &mut Reader) -> Result<Self, DnsError> {
        Ok(ResourceRecord::question(
            r.read_name()?,
            r.read_u16()?,
            r.read_u16()?,
        ))
    }

    fn read(r: &mut Reader) -> Result<Self, DnsError> {
        let name = r.read_name()?;
        let rtype = r.read_u16()?;
        let class = r.read_u16()?;
        let ttl = r.read_u32()?;
        let rdlength = r.read_u16()? as usize;
        let rdata = RData::read(rtype, rdlength, r)?;
        Ok(ResourceRecord::new(name, rtype, class, ttl, Some(rdata)))
    }
}

/// A whole DNS message, immutable once constructed.
///
/// The four sections double as the RFC 2136 zone, prerequisite and update
/// sections when the opcode is UPDATE. An attached signer contributes a
/// trailing TSIG record when the message is encoded.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub id: u16,
    pub flags: Flags,
    pub questions: Vec<ResourceRecord>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
    pub signer: Option<TsigSigner>,
}

impl Message {
    /// A standard query for one name and record type.
    pub fn query(id: u16, name: Name, rtype: u16, class: u16) -> Message {
        Message {
            id,
            flags: Flags {
                rd: true,
                ..Flags::default()
            },
            questions: vec![ResourceRecord::question(name, rtype, class)],
            ..Message::default()
        }
    }

    pub fn opcode(&self) -> u8 {
        self.flags.opcode
    }

    pub fn is_update(&self) -> bool {
        self.flags.opcode == opcode::UPDATE
    }

    /// Encode to wire bytes, signing last if a signer is attached.
    pub fn encode(&self) -> Result<Vec<u8>, DnsError> {
        let mut w = Writer::with_capacity(HEADER_LEN + 64 * self.record_count());
        w.write_u16(self.id);
        w.write_u16(self.flags.to_u16());
        for (section, label) in [
            (&self.questions, "questions"),
            (&self.answers, "answers"),
            (&self.authorities, "authorities"),
            (&self.additionals, "additionals"),
        ] {
            if section.len() > u16::MAX as usize {
                return Err(DnsError::SectionOverflow(label));
            }
            w.write_u16(section.len() as u16);
        }
        for question in &self.questions {
            question.write_question(&mut w);
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            record.write(&mut w)?;
        }
        let mut buf = w.into_bytes();
        if let Some(signer) = &self.signer {
            signer.sign(self.id, &mut buf);
        }
        if buf.len() > MAX_MESSAGE_LEN {
            return Err(DnsError::MessageTooLong(buf.len()));
        }
        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Message, DnsError> {
        if buf.len() < HEADER_LEN {
            return Err(DnsError::HeaderTooShort);
        }
        let mut r = Reader::new(buf);
        let id = r.read_u16()?;
        let flags = Flags::from_u16(r.read_u16()?);
        let qdcount = r.read_u16()?;
        let ancount = r.read_u16()?;
        let nscount = r.read_u16()?;
        let arcount = r.read_u16()?;

        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            questions.push(ResourceRecord::read_question(&mut r)?);
        }
        let mut read_section = |count: u16| -> Result<Vec<ResourceRecord>, DnsError> {
            let mut records = Vec::with_capacity(count as usize);
            for _ in 0..count {
                records.push(ResourceRecord::read(&mut r)?);
            }
            Ok(records)
        };
        let answers = read_section(ancount)?;
        let authorities = read_section(nscount)?;
        let additionals = read_section(arcount)?;

        Ok(Message {
            id,
            flags,
            questions,
            answers,
            authorities,
            additionals,
            signer: None,
        })
    }

    fn record_count(&self) -> usize {
        self.questions.len() + self.answers.len() + self.authorities.len() + self.additionals.len()
    }
}
