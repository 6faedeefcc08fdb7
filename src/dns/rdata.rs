use std::net::{Ipv4Addr, Ipv6Addr};

use super::name::Name;
use super::reader::Reader;
use super::writer::Writer;
use super::{rtype, DnsError};

/// Typed resource record data.
///
/// Whole range of record types used by service discovery and dynamic update
/// is parsed; anything else is carried through as an opaque `Any`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Ns(Name),
    Cname(Name),
    Ptr(Name),
    Mx {
        preference: u16,
        exchange: Name,
    },
    Soa {
        origin: Name,
        mailbox: Name,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    /// One or more length-prefixed strings (RFC 1035 §3.3.14).
    Txt(Vec<Vec<u8>>),
    /// Transaction signature (RFC 2845).
    Tsig {
        algorithm: Name,
        time_signed: u64,
        fudge: u16,
        mac: Vec<u8>,
        original_id: u16,
        error: u16,
        other: Vec<u8>,
    },
    /// Anything that is not parsed further, kept as raw RDATA bytes.
    Any(Vec<u8>),
}

impl RData {
    /// The record type this data belongs to, where it implies one.
    pub fn rtype(&self) -> Option<u16> {
        match self {
            RData::A(..) => Some(rtype::A),
            RData::Aaaa(..) => Some(rtype::AAAA),
            RData::Ns(..) => Some(rtype::NS),
            RData::Cname(..) => Some(rtype::CNAME),
            RData::Ptr(..) => Some(rtype::PTR),
            RData::Mx { .. } => Some(rtype::MX),
            RData::Soa { .. } => Some(rtype::SOA),
            RData::Srv { .. } => Some(rtype::SRV),
            RData::Txt(..) => Some(rtype::TXT),
            RData::Tsig { .. } => Some(rtype::TSIG),
            RData::Any(..) => None,
        }
    }

    pub fn write(&self, w: &mut Writer) -> Result<(), DnsError> {
        match self {
            RData::A(ip) => w.write_bytes(&ip.octets()),
            RData::Aaaa(ip) => w.write_bytes(&ip.octets()),
            RData::Ns(name) | RData::Cname(name) | RData::Ptr(name) => w.write_name(name),
            RData::Mx {
                preference,
                exchange,
            } => {
                w.write_u16(*preference);
                w.write_name(exchange);
            }
            RData::Soa {
                origin,
                mailbox,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                w.write_name(origin);
                w.write_name(mailbox);
                w.write_u32(*serial);
                w.write_u32(*refresh);
                w.write_u32(*retry);
                w.write_u32(*expire);
                w.write_u32(*minimum);
            }
            RData::Srv {
                priority,
                weight,
                port,
                target,
            } => {
                w.write_u16(*priority);
                w.write_u16(*weight);
                w.write_u16(*port);
                w.write_name(target);
            }
            RData::Txt(strings) => {
                if strings.is_empty() {
                    w.write_u8(0);
                }
                for string in strings {
                    if string.len() > 255 {
                        return Err(DnsError::StringTooLong(string.len()));
                    }
                    w.write_u8(string.len() as u8);
                    w.write_bytes(string);
                }
            }
            RData::Tsig {
                algorithm,
                time_signed,
                fudge,
                mac,
                original_id,
                error,
                other,
            } => {
                w.write_name(algorithm);
                w.write_u48(*time_signed);
                w.write_u16(*fudge);
                w.write_u16(mac.len() as u16);
                w.write_bytes(mac);
                w.write_u16(*original_id);
                w.write_u16(*error);
                w.write_u16(other.len() as u16);
                w.write_bytes(other);
            }
            RData::Any(data) => w.write_bytes(data),
        }
        Ok(())
    }

    /// Decode RDATA of the given type; exactly `rdlength` bytes must be
    /// consumed from the reader.
    pub fn read(typ: u16, rdlength: usize, r: &mut Reader) -> Result<RData, DnsError> {
        let start = r.position();
        if r.remaining() < rdlength {
            return Err(DnsError::UnexpectedEof);
        }
        let data = match typ {
            rtype::A => {
                if rdlength != 4 {
                    return Err(DnsError::WrongRdataLength);
                }
                let octets = r.read_bytes(4)?;
                RData::A(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
            }
            rtype::AAAA => {
                if rdlength != 16 {
                    return Err(DnsError::WrongRdataLength);
                }
                let mut octets = [0u8; 16];
                octets.copy_from_slice(r.read_bytes(16)?);
                RData::Aaaa(Ipv6Addr::from(octets))
            }
            rtype::NS => RData::Ns(r.read_name()?),
            rtype::CNAME => RData::Cname(r.read_name()?),
            rtype::PTR => RData::Ptr(r.read_name()?),
            rtype::MX => RData::Mx {
                preference: r.read_u16()?,
                exchange: r.read_name()?,
            },
            rtype::SOA => RData::Soa {
                origin: r.read_name()?,
                mailbox: r.read_name()?,
                serial: r.read_u32()?,
                refresh: r.read_u32()?,
                retry: r.read_u32()?,
                expire: r.read_u32()?,
                minimum: r.read_u32()?,
            },
            rtype::SRV => RData::Srv {
                priority: r.read_u16()?,
                weight: r.read_u16()?,
                port: r.read_u16()?,
                target: r.read_name()?,
            },
            rtype::TXT => {
                let mut strings = Vec::new();
                while r.position() - start < rdlength {
                    let len = r.read_u8()? as usize;
                    strings.push(r.read_bytes(len)?.to_vec());
                }
                RData::Txt(strings)
            }
            rtype::TSIG => {
                let algorithm = r.read_name()?;
                let time_signed = r.read_u48()?;
                let fudge = r.read_u16()?;
                let mac_len = r.read_u16()? as usize;
                let mac = r.read_bytes(mac_len)?.to_vec();
                let original_id = r.read_u16()?;
                let error = r.read_u16()?;
                let other_len = r.read_u16()? as usize;
                let other = r.read_bytes(other_len)?.to_vec();
                RData::Tsig {
                    algorithm,
                    time_signed,
                    fudge,
                    mac,
                    original_id,
                    error,
                    other,
                }
            }
            _ => RData::Any(r.read_bytes(rdlength)?.to_vec()),
        };
        if r.position() - start != rdlength {
            return Err(DnsError::WrongRdataLength);
        }
        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(typ: u16, data: RData) {
        let mut w = Writer::new();
        data.write(&mut w).unwrap();
        let buf = w.into_bytes();
        let mut r = Reader::new(&buf);
        assert_eq!(RData::read(typ, buf.len(), &mut r).unwrap(), data);
    }

    #[test]
    fn srv_layout() {
        let mut w = Writer::new();
        RData::Srv {
            priority: 0,
            weight: 5,
            port: 8080,
            target: Name::from_dotted("node1.example.org."),
        }
        .write(&mut w)
        .unwrap();
        assert_eq!(
            w.into_bytes(),
            b"\x00\x00\x00\x05\x1f\x90\x05node1\x07example\x03org\x00"
        );
    }

    #[test]
    fn soa_round_trip() {
        round_trip(
            rtype::SOA,
            RData::Soa {
                origin: Name::from_dotted("ns.example.org."),
                mailbox: Name::from_dotted("admin.example.org."),
                serial: 2024,
                refresh: 7200,
                retry: 600,
                expire: 86400,
                minimum: 60,
            },
        );
    }

    #[test]
    fn tsig_round_trip() {
        round_trip(
            rtype::TSIG,
            RData::Tsig {
                algorithm: Name::from_dotted("HMAC-MD5.SIG-ALG.REG.INT."),
                time_signed: 1_600_000_000,
                fudge: 300,
                mac: vec![0xab; 16],
                original_id: 77,
                error: 0,
                other: Vec::new(),
            },
        );
    }

    #[test]
    fn empty_txt_is_one_zero_byte() {
        let mut w = Writer::new();
        RData::Txt(Vec::new()).write(&mut w).unwrap();
        assert_eq!(w.into_bytes(), [0]);
    }

    #[test]
    fn unknown_type_keeps_raw_bytes() {
        let buf = [1, 2, 3, 4, 5];
        let mut r = Reader::new(&buf);
        assert_eq!(
            RData::read(99, 5, &mut r).unwrap(),
            RData::Any(vec![1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn short_a_record_is_rejected() {
        let buf = [1, 2, 3];
        let mut r = Reader::new(&buf);
        assert!(matches!(
            RData::read(rtype::A, 3, &mut r),
            Err(DnsError::WrongRdataLength)
        ));
    }
}
