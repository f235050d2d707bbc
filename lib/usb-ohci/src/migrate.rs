// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primitives for the save-state stream.
//!
//! State is written as a flat little-endian byte stream.  Each component
//! opens its section with a marker (a length-prefixed string) so that a
//! reader which has lost its place fails fast rather than misinterpreting
//! the data that follows.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use thiserror::Error;

/// Version of the stream layout produced by this crate.  Streams with a
/// newer version are rejected on load.
pub const FORMAT_VERSION: u32 = 1;

/// Errors encountered while exporting or importing state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(std::io::Error),

    /// The stream did not contain the expected section marker.
    #[error("expected section {expected:?}, found {found:?}")]
    Marker { expected: &'static str, found: String },

    /// The stream ended before the section did.
    #[error("state stream truncated")]
    Truncated,

    #[error("unsupported state format version {0}")]
    Version(u32),

    /// A field held a value no live object can take.
    #[error("invalid {0}: {1}")]
    Invalid(&'static str, i64),

    /// A peripheral rejected its own state.
    #[error("peripheral state rejected: {0}")]
    Peripheral(String),
}

impl From<std::io::Error> for StateError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => StateError::Truncated,
            _ => StateError::Io(err),
        }
    }
}

pub type Result<T> = core::result::Result<T, StateError>;

/// Upper bound on the length of any string (or marker) in the stream.
const MAX_STRING_LEN: u32 = 256;

/// Appends state to a byte buffer.
pub struct StateWriter<'a> {
    cur: Cursor<&'a mut Vec<u8>>,
}

impl<'a> StateWriter<'a> {
    /// Writes to the end of `buf`.
    pub fn new(buf: &'a mut Vec<u8>) -> Self {
        let end = buf.len() as u64;
        let mut cur = Cursor::new(buf);
        cur.set_position(end);
        Self { cur }
    }

    pub fn position(&self) -> u64 {
        self.cur.position()
    }

    pub fn u8(&mut self, v: u8) -> Result<()> {
        Ok(self.cur.write_u8(v)?)
    }
    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.u8(v as u8)
    }
    pub fn u16(&mut self, v: u16) -> Result<()> {
        Ok(self.cur.write_u16::<LE>(v)?)
    }
    pub fn i16(&mut self, v: i16) -> Result<()> {
        Ok(self.cur.write_i16::<LE>(v)?)
    }
    pub fn u32(&mut self, v: u32) -> Result<()> {
        Ok(self.cur.write_u32::<LE>(v)?)
    }
    pub fn i32(&mut self, v: i32) -> Result<()> {
        Ok(self.cur.write_i32::<LE>(v)?)
    }
    pub fn u64(&mut self, v: u64) -> Result<()> {
        Ok(self.cur.write_u64::<LE>(v)?)
    }
    pub fn i64(&mut self, v: i64) -> Result<()> {
        Ok(self.cur.write_i64::<LE>(v)?)
    }
    pub fn f32(&mut self, v: f32) -> Result<()> {
        Ok(self.cur.write_f32::<LE>(v)?)
    }

    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        Ok(self.cur.write_all(v)?)
    }

    pub fn string(&mut self, v: &str) -> Result<()> {
        let len = u32::try_from(v.len())
            .ok()
            .filter(|l| *l <= MAX_STRING_LEN)
            .ok_or(StateError::Invalid("string length", v.len() as i64))?;
        self.u32(len)?;
        self.bytes(v.as_bytes())
    }

    /// Opens a section named `name`.
    pub fn marker(&mut self, name: &str) -> Result<()> {
        self.string(name)
    }

    /// Writes a placeholder `u32`, returning its position for a later
    /// [StateWriter::patch_u32].
    pub fn reserve_u32(&mut self) -> Result<u64> {
        let pos = self.position();
        self.u32(0)?;
        Ok(pos)
    }

    /// Overwrites the `u32` at `pos` without moving the write position.
    pub fn patch_u32(&mut self, pos: u64, v: u32) -> Result<()> {
        let end = self.position();
        if pos + 4 > end {
            return Err(StateError::Invalid("patch position", pos as i64));
        }
        self.cur.seek(SeekFrom::Start(pos))?;
        self.u32(v)?;
        self.cur.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

/// Reads state from a byte buffer.
pub struct StateReader<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> StateReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { cur: Cursor::new(buf) }
    }

    pub fn position(&self) -> u64 {
        self.cur.position()
    }

    fn len(&self) -> u64 {
        self.cur.get_ref().len() as u64
    }

    /// Moves to absolute position `pos`, which must lie within the stream.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len() {
            return Err(StateError::Truncated);
        }
        self.cur.set_position(pos);
        Ok(())
    }

    pub fn skip(&mut self, len: u64) -> Result<()> {
        let pos = self.position().checked_add(len).ok_or(StateError::Truncated)?;
        self.seek(pos)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.cur.read_u8()?)
    }
    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }
    pub fn u16(&mut self) -> Result<u16> {
        Ok(self.cur.read_u16::<LE>()?)
    }
    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.cur.read_i16::<LE>()?)
    }
    pub fn u32(&mut self) -> Result<u32> {
        Ok(self.cur.read_u32::<LE>()?)
    }
    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.cur.read_i32::<LE>()?)
    }
    pub fn u64(&mut self) -> Result<u64> {
        Ok(self.cur.read_u64::<LE>()?)
    }
    pub fn i64(&mut self) -> Result<i64> {
        Ok(self.cur.read_i64::<LE>()?)
    }
    pub fn f32(&mut self) -> Result<f32> {
        Ok(self.cur.read_f32::<LE>()?)
    }

    pub fn bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        Ok(self.cur.read_exact(buf)?)
    }

    pub fn string(&mut self) -> Result<String> {
        let len = self.u32()?;
        if len > MAX_STRING_LEN {
            return Err(StateError::Invalid("string length", len.into()));
        }
        let mut buf = vec![0u8; len as usize];
        self.bytes(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|_| StateError::Invalid("string encoding", len.into()))
    }

    /// Consumes the section marker `name`.
    pub fn expect_marker(&mut self, name: &'static str) -> Result<()> {
        let found = match self.string() {
            Ok(s) => s,
            Err(StateError::Invalid(..)) => String::from("<garbage>"),
            Err(e) => return Err(e),
        };
        if found != name {
            return Err(StateError::Marker { expected: name, found });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn values_are_little_endian() {
        let mut buf = Vec::new();
        let mut w = StateWriter::new(&mut buf);
        w.u32(0x1122_3344).unwrap();
        w.i16(-2).unwrap();
        w.bool(true).unwrap();
        assert_eq!(buf, [0x44, 0x33, 0x22, 0x11, 0xfe, 0xff, 1]);

        let mut r = StateReader::new(&buf);
        assert_eq!(r.u32().unwrap(), 0x1122_3344);
        assert_eq!(r.i16().unwrap(), -2);
        assert!(r.bool().unwrap());
        assert!(matches!(r.u8(), Err(StateError::Truncated)));
    }

    #[test]
    fn backpatched_length() {
        let mut buf = vec![0xaa];
        let mut w = StateWriter::new(&mut buf);
        let pos = w.reserve_u32().unwrap();
        w.bytes(&[1, 2, 3]).unwrap();
        w.patch_u32(pos, 3).unwrap();
        w.u8(4).unwrap();
        assert!(w.patch_u32(100, 0).is_err());
        assert_eq!(buf, [0xaa, 3, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn markers() {
        let mut buf = Vec::new();
        let mut w = StateWriter::new(&mut buf);
        w.marker("USB").unwrap();
        w.marker("USBOHCI").unwrap();

        let mut r = StateReader::new(&buf);
        r.expect_marker("USB").unwrap();
        match r.expect_marker("USBPacket") {
            Err(StateError::Marker { expected, found }) => {
                assert_eq!(expected, "USBPacket");
                assert_eq!(found, "USBOHCI");
            }
            other => panic!("unexpected {other:?}"),
        }

        let garbage = [0xff; 8];
        let mut r = StateReader::new(&garbage);
        assert!(matches!(
            r.expect_marker("USB"),
            Err(StateError::Marker { .. })
        ));
    }

    #[test]
    fn seek_and_skip_stay_in_bounds() {
        let buf = [0u8; 16];
        let mut r = StateReader::new(&buf);
        r.skip(10).unwrap();
        assert_eq!(r.position(), 10);
        assert!(matches!(r.skip(7), Err(StateError::Truncated)));
        r.seek(16).unwrap();
        assert!(r.seek(17).is_err());
    }
}
