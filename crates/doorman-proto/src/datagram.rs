//! Little-endian datagram writer and reader.
//!
//! A [`Datagram`] accumulates positional little-endian fields; a
//! [`DatagramView`] is a checked cursor over received bytes. The cursor
//! returns `Result` from every read so a truncated datagram surfaces as an
//! error at the exact field that ran out, never as a panic.
//!
//! Strings and blobs are length-prefixed with a `u16`, which bounds any
//! single variable field at 65,535 bytes, the same ceiling the bus imposes
//! on whole datagrams.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{errors::ProtocolError, message::ClientMessage, Result};

/// Growable little-endian write buffer for one wire message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Datagram {
    buf: BytesMut,
}

impl Datagram {
    /// Create an empty datagram.
    #[must_use]
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Create a client-facing datagram opened with its message id.
    #[must_use]
    pub fn client(msg: ClientMessage) -> Self {
        let mut dg = Self::new();
        dg.add_u16(msg.to_u16());
        dg
    }

    /// Append a `u8`.
    pub fn add_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    /// Append a `u16` (little-endian).
    pub fn add_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    /// Append a `u32` (little-endian).
    pub fn add_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    /// Append a `u64` (little-endian).
    pub fn add_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Append a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Oversized` if the string exceeds the `u16` length
    ///   prefix.
    pub fn add_string(&mut self, s: &str) -> Result<()> {
        let len = u16::try_from(s.len())
            .map_err(|_| ProtocolError::Oversized { size: s.len(), limit: u16::MAX as usize })?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(s.as_bytes());
        Ok(())
    }

    /// Append a length-prefixed byte blob.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Oversized` if the blob exceeds the `u16` length
    ///   prefix.
    pub fn add_blob(&mut self, data: &[u8]) -> Result<()> {
        let len = u16::try_from(data.len())
            .map_err(|_| ProtocolError::Oversized { size: data.len(), limit: u16::MAX as usize })?;
        self.buf.put_u16_le(len);
        self.buf.put_slice(data);
        Ok(())
    }

    /// Append raw bytes with no length prefix.
    pub fn add_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Current length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the datagram is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Borrow the accumulated bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the datagram into its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

impl From<Datagram> for Bytes {
    fn from(dg: Datagram) -> Self {
        dg.into_bytes()
    }
}

/// Checked read cursor over a received datagram.
///
/// Reads advance an internal position; [`DatagramView::tell`] against
/// [`DatagramView::len`] is how the session layer detects trailing garbage
/// after a fully decoded message.
#[derive(Debug, Clone)]
pub struct DatagramView {
    data: Bytes,
    pos: usize,
}

impl DatagramView {
    /// Wrap received bytes in a cursor positioned at the start.
    #[must_use]
    pub fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    /// Total datagram length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the underlying datagram is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position.
    #[must_use]
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the cursor has consumed the entire datagram.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.pos == self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::Truncated { needed: n, remaining: self.remaining() });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Read a `u8`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if no byte remains.
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a little-endian `u16`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if fewer than 2 bytes remain.
    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if fewer than 4 bytes remain.
    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian `u64`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    /// Read a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if the prefix or body runs out.
    /// - `ProtocolError::InvalidString` if the body is not UTF-8.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::InvalidString)
    }

    /// Read a length-prefixed byte blob.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if the prefix or body runs out.
    pub fn read_blob(&mut self) -> Result<Bytes> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    /// Advance the cursor without interpreting the bytes.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if fewer than `n` bytes remain.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Consume and return everything after the cursor.
    #[must_use]
    pub fn read_remainder(&mut self) -> Bytes {
        let rest = self.data.slice(self.pos..);
        self.pos = self.data.len();
        rest
    }

    /// Copy out an already-read byte range.
    ///
    /// Used by validators that walk fields first and extract the packed
    /// bytes afterwards. Positions come from [`DatagramView::tell`], so the
    /// range is always in bounds for well-behaved callers.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or inverted.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Bytes {
        self.data.slice(start..end)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut dg = Datagram::new();
        dg.add_u8(0xAB);
        dg.add_u16(0xBEEF);
        dg.add_u32(0xDEAD_BEEF);
        dg.add_u64(0x0123_4567_89AB_CDEF);

        let mut view = DatagramView::new(dg.into_bytes());
        assert_eq!(view.read_u8().unwrap(), 0xAB);
        assert_eq!(view.read_u16().unwrap(), 0xBEEF);
        assert_eq!(view.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(view.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert!(view.is_exhausted());
    }

    #[test]
    fn string_round_trip() {
        let mut dg = Datagram::new();
        dg.add_string("dev").unwrap();

        let mut view = DatagramView::new(dg.into_bytes());
        assert_eq!(view.read_string().unwrap(), "dev");
        assert!(view.is_exhausted());
    }

    #[test]
    fn truncated_read_reports_shortfall() {
        let mut dg = Datagram::new();
        dg.add_u16(7);

        let mut view = DatagramView::new(dg.into_bytes());
        let err = view.read_u32().unwrap_err();
        assert_eq!(err, ProtocolError::Truncated { needed: 4, remaining: 2 });
    }

    #[test]
    fn string_prefix_lies_about_length() {
        let mut dg = Datagram::new();
        dg.add_u16(10); // claims 10 bytes
        dg.add_raw(b"abc"); // provides 3

        let mut view = DatagramView::new(dg.into_bytes());
        assert!(matches!(view.read_string(), Err(ProtocolError::Truncated { .. })));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut dg = Datagram::new();
        dg.add_u16(2);
        dg.add_raw(&[0xFF, 0xFE]);

        let mut view = DatagramView::new(dg.into_bytes());
        assert_eq!(view.read_string(), Err(ProtocolError::InvalidString));
    }

    #[test]
    fn remainder_consumes_to_end() {
        let mut dg = Datagram::new();
        dg.add_u16(1);
        dg.add_raw(&[9, 9, 9]);

        let mut view = DatagramView::new(dg.into_bytes());
        view.read_u16().unwrap();
        assert_eq!(view.read_remainder().as_ref(), &[9, 9, 9]);
        assert!(view.is_exhausted());
        assert!(view.read_remainder().is_empty());
    }

    proptest! {
        #[test]
        fn mixed_fields_round_trip(
            a in any::<u32>(),
            b in any::<u64>(),
            s in "[a-zA-Z0-9 ]{0,64}",
            blob in prop::collection::vec(any::<u8>(), 0..256),
        ) {
            let mut dg = Datagram::new();
            dg.add_u32(a);
            dg.add_string(&s).unwrap();
            dg.add_blob(&blob).unwrap();
            dg.add_u64(b);

            let mut view = DatagramView::new(dg.into_bytes());
            prop_assert_eq!(view.read_u32().unwrap(), a);
            prop_assert_eq!(view.read_string().unwrap(), s);
            let read_blob = view.read_blob().unwrap();
            prop_assert_eq!(read_blob.as_ref(), blob.as_slice());
            prop_assert_eq!(view.read_u64().unwrap(), b);
            prop_assert!(view.is_exhausted());
        }

        #[test]
        fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            let mut view = DatagramView::new(Bytes::from(bytes));
            // Exercise every reader; only Ok/Err, never a panic.
            let _ = view.read_u8();
            let _ = view.read_u16();
            let _ = view.read_u32();
            let _ = view.read_u64();
            let _ = view.read_string();
            let _ = view.read_blob();
            let _ = view.read_remainder();
        }
    }
}
