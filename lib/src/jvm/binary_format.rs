use byteorder::{BigEndian, WriteBytesExt};
use std::io::Result;

/// Utility trait for writing out the big-endian pieces of a method body
///
/// Every operand in the code array is big-endian, and the widths are fixed by the opcode, so an
/// extra trait is simpler than threading `BigEndian` through every call site.
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i8(*self)
    }
}

impl Serialize for i16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i16::<BigEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<BigEndian>(*self)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn big_endian() {
        let mut out: Vec<u8> = vec![];
        0xCAFEu16.serialize(&mut out).unwrap();
        (-2i16).serialize(&mut out).unwrap();
        0x0102_0304i32.serialize(&mut out).unwrap();
        assert_eq!(out, vec![0xCA, 0xFE, 0xFF, 0xFE, 0x01, 0x02, 0x03, 0x04]);
    }
}
