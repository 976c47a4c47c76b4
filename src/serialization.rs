//! Little-endian primitive and string codecs for cache files.

use std::io::{Read, Write};

use crate::error::PagerError;

/// Upper bound for a single serialized string.
///
/// Words are capped well below this by the content drivers; anything larger
/// indicates a corrupt length prefix.
pub const MAX_STRING_BYTES: u32 = 16 * 1024;

pub fn write_u8<W: Write + ?Sized>(w: &mut W, v: u8) -> Result<(), PagerError> {
    w.write_all(&[v])?;
    Ok(())
}

pub fn write_u16<W: Write + ?Sized>(w: &mut W, v: u16) -> Result<(), PagerError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i16<W: Write + ?Sized>(w: &mut W, v: i16) -> Result<(), PagerError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u32<W: Write + ?Sized>(w: &mut W, v: u32) -> Result<(), PagerError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_i32<W: Write + ?Sized>(w: &mut W, v: i32) -> Result<(), PagerError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_f32<W: Write + ?Sized>(w: &mut W, v: f32) -> Result<(), PagerError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a `u32` length prefix followed by the UTF-8 bytes.
pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &str) -> Result<(), PagerError> {
    let len = u32::try_from(s.len())
        .ok()
        .filter(|len| *len <= MAX_STRING_BYTES)
        .ok_or_else(|| {
            PagerError::new(
                crate::error::ErrorPhase::Serialize,
                "STRING_TOO_LONG",
                format!("String of {} bytes exceeds {}", s.len(), MAX_STRING_BYTES),
            )
        })?;
    write_u32(w, len)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_array<R: Read + ?Sized, const N: usize>(r: &mut R) -> Result<[u8; N], PagerError> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u8<R: Read + ?Sized>(r: &mut R) -> Result<u8, PagerError> {
    Ok(read_array::<R, 1>(r)?[0])
}

pub fn read_u16<R: Read + ?Sized>(r: &mut R) -> Result<u16, PagerError> {
    Ok(u16::from_le_bytes(read_array(r)?))
}

pub fn read_i16<R: Read + ?Sized>(r: &mut R) -> Result<i16, PagerError> {
    Ok(i16::from_le_bytes(read_array(r)?))
}

pub fn read_u32<R: Read + ?Sized>(r: &mut R) -> Result<u32, PagerError> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

pub fn read_i32<R: Read + ?Sized>(r: &mut R) -> Result<i32, PagerError> {
    Ok(i32::from_le_bytes(read_array(r)?))
}

pub fn read_f32<R: Read + ?Sized>(r: &mut R) -> Result<f32, PagerError> {
    Ok(f32::from_le_bytes(read_array(r)?))
}

/// Read a length-prefixed UTF-8 string.
pub fn read_string<R: Read + ?Sized>(r: &mut R) -> Result<String, PagerError> {
    let len = read_u32(r)?;
    if len > MAX_STRING_BYTES {
        return Err(PagerError::corrupt(
            "CORRUPT_STRING_LENGTH",
            format!("String length {} exceeds {}", len, MAX_STRING_BYTES),
        ));
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| PagerError::corrupt("CORRUPT_UTF8", "Stored string is not valid UTF-8"))
}
