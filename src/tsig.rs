//! Transaction signatures (RFC 2845).
//!
//! A signer is attached to a [`Message`](crate::dns::Message) and runs after
//! the base message has been encoded: the HMAC covers the full message buffer
//! followed by a fixed trailer, the resulting TSIG record is appended to the
//! ADDITIONALS section, and the ARCOUNT in the already-encoded header is
//! incremented in place.

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::dns::{class, rtype, Name, RData, Writer};

/// Largest fudge value the 15-bit field admits.
const MAX_FUDGE: u16 = 0x7fff;

#[derive(Debug, Error)]
pub enum TsigError {
    #[error("unknown TSIG algorithm name {0:?}")]
    UnknownAlgorithm(String),
}

/// HMAC algorithm family resolved from a TSIG algorithm name.
///
/// `HMAC-MD5.SIG-ALG.REG.INT` maps to MD5; any `hmac-<digest>` maps to that
/// digest. Matching is case-insensitive and ignores the trailing dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn from_name(name: &str) -> Result<Algorithm, TsigError> {
        match name.trim_end_matches('.').to_ascii_lowercase().as_str() {
            "hmac-md5.sig-alg.reg.int" | "hmac-md5" => Ok(Algorithm::Md5),
            "hmac-sha1" => Ok(Algorithm::Sha1),
            "hmac-sha224" => Ok(Algorithm::Sha224),
            "hmac-sha256" => Ok(Algorithm::Sha256),
            "hmac-sha384" => Ok(Algorithm::Sha384),
            "hmac-sha512" => Ok(Algorithm::Sha512),
            _ => Err(TsigError::UnknownAlgorithm(name.to_owned())),
        }
    }

    /// Canonical algorithm name as it appears on the wire.
    pub fn name(&self) -> Name {
        match self {
            Algorithm::Md5 => Name::from_dotted("HMAC-MD5.SIG-ALG.REG.INT."),
            Algorithm::Sha1 => Name::from_dotted("hmac-sha1."),
            Algorithm::Sha224 => Name::from_dotted("hmac-sha224."),
            Algorithm::Sha256 => Name::from_dotted("hmac-sha256."),
            Algorithm::Sha384 => Name::from_dotted("hmac-sha384."),
            Algorithm::Sha512 => Name::from_dotted("hmac-sha512."),
        }
    }

    fn compute(&self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        match self {
            Algorithm::Md5 => hmac_bytes::<Hmac<Md5>>(key, parts),
            Algorithm::Sha1 => hmac_bytes::<Hmac<Sha1>>(key, parts),
            Algorithm::Sha224 => hmac_bytes::<Hmac<Sha224>>(key, parts),
            Algorithm::Sha256 => hmac_bytes::<Hmac<Sha256>>(key, parts),
            Algorithm::Sha384 => hmac_bytes::<Hmac<Sha384>>(key, parts),
            Algorithm::Sha512 => hmac_bytes::<Hmac<Sha512>>(key, parts),
        }
    }
}

fn hmac_bytes<M: Mac + KeyInit>(key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut mac = <M as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

/// Signs one encoded message with a shared key.
#[derive(Debug, Clone)]
pub struct TsigSigner {
    key_name: Name,
    algorithm: Algorithm,
    key: Vec<u8>,
    fudge: u16,
}

impl TsigSigner {
    pub fn new(key_name: Name, algorithm: Algorithm, key: Vec<u8>) -> TsigSigner {
        TsigSigner {
            key_name,
            algorithm,
            key,
            fudge: 300,
        }
    }

    pub fn with_fudge(mut self, fudge: u16) -> TsigSigner {
        self.fudge = fudge.min(MAX_FUDGE);
        self
    }

    pub fn key_name(&self) -> &Name {
        &self.key_name
    }

    /// Sign `buf` at the current wall-clock second.
    pub fn sign(&self, original_id: u16, buf: &mut Vec<u8>) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        self.sign_at(original_id, buf, now);
    }

    /// Sign `buf` as of `time_signed` (whole seconds since the epoch).
    ///
    /// Appends the TSIG record to `buf` and bumps the encoded ARCOUNT.
    pub fn sign_at(&self, original_id: u16, buf: &mut Vec<u8>, time_signed: u64) {
        let mac = self.algorithm.compute(
            &self.key,
            &[buf.as_slice(), &self.trailer(time_signed).into_bytes()],
        );

        let record = RData::Tsig {
            algorithm: self.algorithm.name(),
            time_signed,
            fudge: self.fudge,
            mac,
            original_id,
            error: 0,
            other: Vec::new(),
        };
        let mut w = Writer::new();
        w.write_name(&self.key_name);
        w.write_u16(rtype::TSIG);
        w.write_u16(class::ANY);
        w.write_u32(0);
        let size_offset = w.len();
        w.write_u16(0);
        let data_offset = w.len();
        record
            .write(&mut w)
            .expect("TSIG rdata contains no length-limited strings");
        w.patch_u16(size_offset, (w.len() - data_offset) as u16);
        buf.extend_from_slice(&w.into_bytes());

        let arcount = u16::from_be_bytes([buf[10], buf[11]]).wrapping_add(1);
        buf[10..12].copy_from_slice(&arcount.to_be_bytes());
    }

    /// The digested trailer of RFC 2845 §3.4: key name, class, TTL,
    /// algorithm name, time, fudge, error and other-data length.
    fn trailer(&self, time_signed: u64) -> Writer {
        let mut w = Writer::new();
        w.write_name(&self.key_name);
        w.write_u16(class::ANY);
        w.write_u32(0);
        w.write_name(&self.algorithm.name());
        w.write_u48(time_signed);
        w.write_u16(self.fudge);
        w.write_u16(0);
        w.write_u16(0);
        w
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dns::{Message, Reader};

    fn signer() -> TsigSigner {
        TsigSigner::new(
            Name::from_dotted("k.example.org."),
            Algorithm::Md5,
            b"0123456789abcdef".to_vec(),
        )
    }

    #[test]
    fn algorithm_names_resolve_case_insensitively() {
        assert_eq!(
            Algorithm::from_name("HMAC-MD5.SIG-ALG.REG.INT").unwrap(),
            Algorithm::Md5
        );
        assert_eq!(
            Algorithm::from_name("Hmac-Sha256.").unwrap(),
            Algorithm::Sha256
        );
        assert!(Algorithm::from_name("hmac-crc32").is_err());
    }

    #[test]
    fn signing_appends_record_and_bumps_arcount() {
        let message = Message::query(9, Name::from_dotted("example.org."), rtype::SOA, class::IN);
        let mut buf = message.encode().unwrap();
        let unsigned_len = buf.len();

        signer().sign_at(9, &mut buf, 1_600_000_000);

        assert!(buf.len() > unsigned_len);
        assert_eq!(u16::from_be_bytes([buf[10], buf[11]]), 1);

        let signed = Message::decode(&buf).unwrap();
        let tsig = &signed.additionals[0];
        assert_eq!(tsig.rtype, rtype::TSIG);
        assert_eq!(tsig.class, class::ANY);
        assert_eq!(tsig.name, Name::from_dotted("k.example.org."));
        match tsig.rdata.as_ref().unwrap() {
            RData::Tsig {
                time_signed,
                fudge,
                mac,
                original_id,
                ..
            } => {
                assert_eq!(*time_signed, 1_600_000_000);
                assert_eq!(*fudge, 300);
                assert_eq!(mac.len(), 16);
                assert_eq!(*original_id, 9);
            }
            other => panic!("expected TSIG rdata, got {:?}", other),
        }
    }

    #[test]
    fn mac_matches_reference_computation() {
        let message = Message::query(9, Name::from_dotted("example.org."), rtype::SOA, class::IN);
        let mut buf = message.encode().unwrap();
        let unsigned = buf.clone();

        signer().sign_at(9, &mut buf, 1_600_000_000);

        let mut trailer = Writer::new();
        trailer.write_name(&Name::from_dotted("k.example.org."));
        trailer.write_u16(class::ANY);
        trailer.write_u32(0);
        trailer.write_name(&Name::from_dotted("HMAC-MD5.SIG-ALG.REG.INT."));
        trailer.write_u48(1_600_000_000);
        trailer.write_u16(300);
        trailer.write_u16(0);
        trailer.write_u16(0);
        let mut reference = <Hmac<Md5> as Mac>::new_from_slice(b"0123456789abcdef").unwrap();
        reference.update(&unsigned);
        reference.update(&trailer.into_bytes());
        let expected = reference.finalize().into_bytes().to_vec();

        let signed = Message::decode(&buf).unwrap();
        match signed.additionals[0].rdata.as_ref().unwrap() {
            RData::Tsig { mac, .. } => assert_eq!(*mac, expected),
            other => panic!("expected TSIG rdata, got {:?}", other),
        }
    }

    #[test]
    fn fudge_is_clamped_to_15_bits() {
        let signer = signer().with_fudge(u16::MAX);
        let mut buf = Message::query(1, Name::from_dotted("example.org."), rtype::SOA, class::IN)
            .encode()
            .unwrap();
        signer.sign_at(1, &mut buf, 0);
        let signed = Message::decode(&buf).unwrap();
        match signed.additionals[0].rdata.as_ref().unwrap() {
            RData::Tsig { fudge, .. } => assert_eq!(*fudge, 0x7fff),
            other => panic!("expected TSIG rdata, got {:?}", other),
        }
    }

    #[test]
    fn reader_skips_nothing_after_signed_message() {
        let mut buf = Message::query(3, Name::from_dotted("example.org."), rtype::SOA, class::IN)
            .encode()
            .unwrap();
        signer().sign_at(3, &mut buf, 42);
        let mut r = Reader::new(&buf);
        r.read_bytes(buf.len()).unwrap();
        assert_eq!(r.remaining(), 0);
    }
}
