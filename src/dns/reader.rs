use byteorder::{BigEndian, ByteOrder};

use super::name::Name;
use super::DnsError;

/// Maximum number of compression pointers followed while reading one name.
const MAX_POINTER_HOPS: usize = 64;

/// Sequential big-endian reader over a message buffer.
///
/// The cursor only ever moves forward; compressed names are followed by a
/// side cursor so the caller's position stays consistent.
pub struct Reader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, cursor: 0 }
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DnsError> {
        if self.remaining() < n {
            return Err(DnsError::UnexpectedEof);
        }
        let slice = &self.buf[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, DnsError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DnsError> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, DnsError> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    /// 48-bit big-endian integer, as used by the TSIG timestamp.
    pub fn read_u48(&mut self) -> Result<u64, DnsError> {
        Ok(BigEndian::read_u48(self.take(6)?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DnsError> {
        self.take(n)
    }

    /// Read a possibly compressed name (RFC 1035 §4.1.4).
    ///
    /// A length byte with the top two bits set is a 14-bit pointer to an
    /// earlier offset in the same buffer. The labels there are consumed by a
    /// side cursor; the caller's cursor advances past the pointer only.
    pub fn read_name(&mut self) -> Result<Name, DnsError> {
        let mut name = String::new();
        let mut pos = self.cursor;
        let mut jumped = false;
        let mut hops = 0;

        loop {
            if pos >= self.buf.len() {
                return Err(DnsError::UnexpectedEof);
            }
            let len = self.buf[pos];
            if len == 0 {
                if !jumped {
                    self.cursor = pos + 1;
                }
                if name.is_empty() {
                    name.push('.');
                }
                return Ok(Name::from_dotted(name));
            } else if len & 0xc0 == 0xc0 {
                if pos + 2 > self.buf.len() {
                    return Err(DnsError::UnexpectedEof);
                }
                let offset = (BigEndian::read_u16(&self.buf[pos..pos + 2]) & 0x3fff) as usize;
                if offset >= self.buf.len() {
                    return Err(DnsError::BadPointer(offset));
                }
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(DnsError::PointerLoop);
                }
                if !jumped {
                    self.cursor = pos + 2;
                    jumped = true;
                }
                pos = offset;
            } else if len & 0xc0 == 0 {
                let end = pos + 1 + len as usize;
                if end >= self.buf.len() {
                    return Err(DnsError::UnexpectedEof);
                }
                let label = std::str::from_utf8(&self.buf[pos + 1..end])
                    .map_err(|_| DnsError::LabelIsNotAscii)?;
                if !label.is_ascii() {
                    return Err(DnsError::LabelIsNotAscii);
                }
                name.push_str(label);
                name.push('.');
                pos = end;
            } else {
                return Err(DnsError::UnknownLabelFormat);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integers() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0203);
        assert_eq!(r.read_u48().unwrap(), 0x0405_0607_0809);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn plain_name() {
        let buf = b"\x07example\x03org\x00";
        let mut r = Reader::new(buf);
        let name = r.read_name().unwrap();
        assert_eq!(name.as_str(), "example.org.");
        assert_eq!(r.position(), buf.len());
    }

    #[test]
    fn compressed_name_leaves_cursor_after_pointer() {
        // Offset 0: "example.org."; offset 13: "node1" + pointer to 0.
        let buf = b"\x07example\x03org\x00\x05node1\xc0\x00\xff";
        let mut r = Reader::new(buf);
        r.read_name().unwrap();
        let name = r.read_name().unwrap();
        assert_eq!(name.as_str(), "node1.example.org.");
        assert_eq!(r.read_u8().unwrap(), 0xff);
    }

    #[test]
    fn root_name() {
        let buf = [0u8, 7u8];
        let mut r = Reader::new(&buf);
        assert_eq!(r.read_name().unwrap().as_str(), ".");
        assert_eq!(r.position(), 1);
    }

    #[test]
    fn pointer_loop_detected() {
        let buf = [0xc0, 0x00];
        let mut r = Reader::new(&buf);
        assert!(matches!(r.read_name(), Err(DnsError::PointerLoop)));
    }
}
