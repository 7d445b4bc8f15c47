//! Small cursor over a decoded packet body, plus the length-prefixed string
//! encoding every login opcode body uses.

/// A read-only cursor over an inbound packet's already-decrypted body.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn u16(&mut self) -> Option<u16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    /// A `[u16 len][len bytes]`-encoded UTF-8 string.
    pub fn string(&mut self) -> Option<String> {
        let len = self.u16()? as usize;
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let out = self.buf.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(out)
    }
}

/// A growable packet body builder: opcode first, then fields in the same
/// length-prefixed-string encoding `Reader` parses.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn opcode(opcode: u16) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(&opcode.to_le_bytes());
        Self { buf }
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn u16(mut self, v: u16) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(mut self, v: i32) -> Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn bytes(mut self, b: &[u8]) -> Self {
        self.buf.extend_from_slice(b);
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_fields_in_write_order() {
        let body = Writer::opcode(0x1234).u8(7).u32(99).string("alice").finish();
        let mut reader = Reader::new(&body);
        assert_eq!(reader.u16(), Some(0x1234));
        assert_eq!(reader.u8(), Some(7));
        assert_eq!(reader.u32(), Some(99));
        assert_eq!(reader.string().as_deref(), Some("alice"));
    }

    #[test]
    fn reading_past_the_end_yields_none() {
        let body = Writer::opcode(0x0001).u8(1).finish();
        let mut reader = Reader::new(&body);
        reader.u16();
        reader.u8();
        assert_eq!(reader.u32(), None);
    }
}
