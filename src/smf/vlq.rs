use std::io::Read;

use byteorder::ReadBytesExt;

use crate::{Error, Result};

/// Largest value a four-byte variable-length quantity can hold.
pub const MAX: u32 = 0x0FFF_FFFF;

pub fn read(reader: &mut impl Read) -> Result<u32> {
    let mut value = 0u32;
    for _ in 0..4 {
        let byte = reader.read_u8().map_err(|_| Error::TruncatedData {
            context: "variable-length quantity",
        })?;
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::TruncatedData {
        context: "variable-length quantity",
    })
}

pub fn write(value: u32, out: &mut Vec<u8>) {
    let value = value.min(MAX);
    let mut buf = [0u8; 4];
    let mut n = 0;
    let mut rest = value;
    loop {
        buf[n] = (rest & 0x7F) as u8;
        n += 1;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let continuation = if i > 0 { 0x80 } else { 0 };
        out.push(buf[i] | continuation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn encodes_reference_values() {
        let cases: [(u32, &[u8]); 6] = [
            (0x00, &[0x00]),
            (0x7F, &[0x7F]),
            (0x80, &[0x81, 0x00]),
            (0x2000, &[0xC0, 0x00]),
            (0x1F_FFFF, &[0xFF, 0xFF, 0x7F]),
            (0x0FFF_FFFF, &[0xFF, 0xFF, 0xFF, 0x7F]),
        ];
        for (value, bytes) in cases {
            let mut out = Vec::new();
            write(value, &mut out);
            assert_eq!(out, bytes, "encoding {value:#x}");
            assert_eq!(read(&mut Cursor::new(bytes)).unwrap(), value);
        }
    }

    #[test]
    fn reports_truncation() {
        assert!(matches!(
            read(&mut Cursor::new(&[0x81u8][..])),
            Err(Error::TruncatedData { .. })
        ));
        assert!(read(&mut Cursor::new(&[0xFFu8, 0xFF, 0xFF, 0xFF, 0x7F][..])).is_err());
    }
}
