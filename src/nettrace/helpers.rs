use std::io::{Read, Seek};

use binrw::{BinReaderExt, BinResult, NullWideString};
use uuid::Uuid;

fn overflow(pos: u64, width: u32) -> binrw::Error {
    binrw::Error::AssertFail {
        pos,
        message: format!("VarInt{width} exceeds its maximum encoded length"),
    }
}

/// 7-bit continuation coding, at most 5 bytes; the residual bits of the
/// trailing byte must fit in the remaining 4 bits of the value.
pub fn read_varint_u32<R: BinReaderExt + Read + Seek>(reader: &mut R) -> BinResult<u32> {
    let mut result = 0u32;
    for i in 0..5 {
        let byte: u8 = reader.read_le()?;
        if i == 4 && byte > 0x0f {
            return Err(overflow(reader.stream_position()?, 32));
        }
        result |= u32::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(overflow(reader.stream_position()?, 32))
}

/// 7-bit continuation coding, at most 10 bytes; the trailing byte may only
/// carry the final value bit.
pub fn read_varint_u64<R: BinReaderExt + Read + Seek>(reader: &mut R) -> BinResult<u64> {
    let mut result = 0u64;
    for i in 0..10 {
        let byte: u8 = reader.read_le()?;
        if i == 9 && byte > 0x01 {
            return Err(overflow(reader.stream_position()?, 64));
        }
        result |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result);
        }
    }
    Err(overflow(reader.stream_position()?, 64))
}

pub fn read_varint_i32<R: BinReaderExt + Read + Seek>(reader: &mut R) -> BinResult<i32> {
    read_varint_u32(reader).map(|v| v as i32)
}

pub fn read_varint_i64<R: BinReaderExt + Read + Seek>(reader: &mut R) -> BinResult<i64> {
    read_varint_u64(reader).map(|v| v as i64)
}

/// Null-terminated little-endian UTF-16.
pub fn read_utf16_null<R: BinReaderExt + Read + Seek>(reader: &mut R) -> BinResult<String> {
    let wide: NullWideString = reader.read_le()?;
    Ok(wide.to_string())
}

/// 16 bytes in the Windows GUID layout (u32/u16/u16 little-endian plus
/// 8 raw bytes).
pub fn read_guid<R: BinReaderExt + Read + Seek>(reader: &mut R) -> BinResult<Uuid> {
    let bytes: [u8; 16] = reader.read_le()?;
    Ok(Uuid::from_bytes_le(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn varint_u32_boundaries() {
        let mut cursor = Cursor::new(&[0x00u8][..]);
        assert_eq!(read_varint_u32(&mut cursor).unwrap(), 0);

        let mut cursor = Cursor::new(&[0x82u8, 0x14][..]);
        assert_eq!(read_varint_u32(&mut cursor).unwrap(), 0xa02);

        // u32::MAX is the largest 5-byte encoding.
        let mut cursor = Cursor::new(&[0xffu8, 0xff, 0xff, 0xff, 0x0f][..]);
        assert_eq!(read_varint_u32(&mut cursor).unwrap(), u32::MAX);
    }

    #[test]
    fn varint_u32_rejects_residual_bits() {
        let mut cursor = Cursor::new(&[0xffu8, 0xff, 0xff, 0xff, 0x1f][..]);
        assert!(read_varint_u32(&mut cursor).is_err());

        // A continuation bit on the fifth byte can never be valid.
        let mut cursor = Cursor::new(&[0xffu8, 0xff, 0xff, 0xff, 0x8f, 0x00][..]);
        assert!(read_varint_u32(&mut cursor).is_err());
    }

    #[test]
    fn varint_u64_boundaries() {
        let mut encoded = [0xffu8; 10];
        encoded[9] = 0x01;
        let mut cursor = Cursor::new(&encoded[..]);
        assert_eq!(read_varint_u64(&mut cursor).unwrap(), u64::MAX);

        let mut encoded = [0xffu8; 10];
        encoded[9] = 0x02;
        let mut cursor = Cursor::new(&encoded[..]);
        assert!(read_varint_u64(&mut cursor).is_err());
    }

    #[test]
    fn varint_i32_reinterprets_the_bits() {
        // -1 encodes as the full-width unsigned pattern.
        let mut cursor = Cursor::new(&[0xffu8, 0xff, 0xff, 0xff, 0x0f][..]);
        assert_eq!(read_varint_i32(&mut cursor).unwrap(), -1);
    }

    #[test]
    fn varint_truncation_is_an_eof() {
        let mut cursor = Cursor::new(&[0x80u8][..]);
        match read_varint_u32(&mut cursor) {
            Err(binrw::Error::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected an eof error, got {other:?}"),
        }
    }

    #[test]
    fn utf16_reads_to_the_terminator() {
        let mut bytes = Vec::new();
        for unit in "Trace\u{e9}".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        bytes.extend_from_slice(&[0, 0, 0x41, 0x00]);
        let mut cursor = Cursor::new(bytes.as_slice());
        assert_eq!(read_utf16_null(&mut cursor).unwrap(), "Trace\u{e9}");
        assert_eq!(cursor.position(), (bytes.len() - 2) as u64);
    }

    #[test]
    fn guid_uses_the_windows_field_layout() {
        let bytes = [
            0x78, 0x56, 0x34, 0x12, 0xbc, 0x9a, 0xf0, 0xde, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
            0x07, 0x08,
        ];
        let mut cursor = Cursor::new(&bytes[..]);
        let guid = read_guid(&mut cursor).unwrap();
        assert_eq!(
            guid.to_string(),
            "12345678-9abc-def0-0102-030405060708"
        );
    }
}
