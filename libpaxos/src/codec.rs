//! Wire format for client submissions sent to a proposer.
//!
//! Message format (MessagePack): `[message_type, value]`
//!
//! - **envelope**: fixarray of 2 (`0x92`)
//! - **message_type**: [`SUBMIT_TAG`] as the most compact msgpack integer (`0x08`)
//! - **value**: the value bytes behind a length prefix, framed per [`BlobEncoding`]
//!
//! Nothing else is added: no checksum, no terminator. The same value always
//! encodes to the same bytes.
//!
//! | Length | [`BlobEncoding::Bin`] | [`BlobEncoding::Raw`] |
//! |--------|-----------------------|-----------------------|
//! | < 32 | `c4 len` | `a0 \| len` |
//! | < 2^8 | `c4 len` | `da len:2` |
//! | < 2^16 | `c5 len:2` | `da len:2` |
//! | < 2^32 | `c6 len:4` | `db len:4` |
//!
//! Decoders accept both framings.

use std::io::{self, Write};

use rmp::Marker;
use rmp::decode::{NumValueReadError, ValueReadError};

use crate::error::CodecError;

/// Message type of a client submission in the engine's message vocabulary.
///
/// It follows prepare, promise, accept, accepted, preempted, repeat, trim and
/// acceptor-state in the engine's enumeration. Changing it breaks every
/// deployed proposer.
pub const SUBMIT_TAG: i32 = 8;

/// Largest value that fits a 32-bit length prefix.
pub const MAX_VALUE_SIZE: usize = u32::MAX as usize;

/// How the value blob is framed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BlobEncoding {
    /// MessagePack `bin` family.
    #[default]
    Bin,
    /// Predecessor `raw` family, as written by older encoders: fixraw, raw16
    /// and raw32, with no 8-bit length form.
    Raw,
}

/// A decoded submission, borrowing the value from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitMessage<'a> {
    /// Always [`SUBMIT_TAG`] for a successfully decoded message.
    pub message_type: i32,
    /// The submitted value.
    pub value: &'a [u8],
    /// The framing the value was found in.
    pub encoding: BlobEncoding,
}

/// Encoder for submission messages with a fixed blob framing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitEncoder {
    blob: BlobEncoding,
}

impl SubmitEncoder {
    /// Create an encoder using the given blob framing.
    pub const fn new(blob: BlobEncoding) -> Self {
        Self { blob }
    }

    /// Encoder writing the predecessor `raw` framing.
    pub const fn legacy() -> Self {
        Self::new(BlobEncoding::Raw)
    }

    /// The blob framing used by this encoder.
    pub const fn blob_encoding(&self) -> BlobEncoding {
        self.blob
    }

    /// Exact size of the encoded message for a value of `len` bytes.
    pub const fn encoded_len(&self, len: usize) -> usize {
        let prefix = match self.blob {
            BlobEncoding::Bin if len <= u8::MAX as usize => 2,
            BlobEncoding::Bin if len <= u16::MAX as usize => 3,
            BlobEncoding::Raw if len < 32 => 1,
            BlobEncoding::Raw if len <= u16::MAX as usize => 3,
            _ => 5,
        };
        // array marker + tag
        2 + prefix + len
    }

    /// Write the submission for `value` into `sink`.
    ///
    /// The tag goes first, then the length-prefixed value.
    ///
    /// # Errors
    ///
    /// - `ValueTooLarge`: the value exceeds [`MAX_VALUE_SIZE`]; nothing is written
    /// - `Sink`: the sink failed; bytes written before the failure stay in it
    pub fn encode<W: Write>(&self, value: &[u8], sink: &mut W) -> Result<(), CodecError> {
        check_value_len(value.len())?;

        rmp::encode::write_array_len(sink, 2)?;
        rmp::encode::write_sint(sink, i64::from(SUBMIT_TAG))?;
        match self.blob {
            BlobEncoding::Bin => rmp::encode::write_bin(sink, value)?,
            BlobEncoding::Raw => write_raw(sink, value).map_err(CodecError::Sink)?,
        }
        Ok(())
    }

    /// Encode the submission for `value` into a new buffer.
    ///
    /// # Errors
    ///
    /// Returns `ValueTooLarge` if the value exceeds [`MAX_VALUE_SIZE`].
    pub fn encode_to_vec(&self, value: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(self.encoded_len(value.len()));
        self.encode(value, &mut buf)?;
        Ok(buf)
    }
}

fn check_value_len(len: usize) -> Result<(), CodecError> {
    if len > MAX_VALUE_SIZE {
        return Err(CodecError::ValueTooLarge {
            size: len,
            max: MAX_VALUE_SIZE,
        });
    }
    Ok(())
}

fn write_raw<W: Write>(sink: &mut W, value: &[u8]) -> io::Result<()> {
    let len = value.len();
    if len < 32 {
        sink.write_all(&[Marker::FixStr(len as u8).to_u8()])?;
    } else if len <= u16::MAX as usize {
        sink.write_all(&[Marker::Str16.to_u8()])?;
        sink.write_all(&(len as u16).to_be_bytes())?;
    } else {
        sink.write_all(&[Marker::Str32.to_u8()])?;
        sink.write_all(&(len as u32).to_be_bytes())?;
    }
    sink.write_all(value)
}

/// Encode `value` as a submission into `sink` with the default `bin` framing.
///
/// # Errors
///
/// See [`SubmitEncoder::encode`].
///
/// # Examples
///
/// ```
/// use libpaxos::serialize_submit;
///
/// let mut buf = Vec::new();
/// serialize_submit(b"hello", &mut buf).expect("encode");
/// assert_eq!(buf, [0x92, 0x08, 0xc4, 0x05, b'h', b'e', b'l', b'l', b'o']);
/// ```
pub fn serialize_submit<W: Write>(value: &[u8], sink: &mut W) -> Result<(), CodecError> {
    SubmitEncoder::default().encode(value, sink)
}

/// Decode a complete submission message.
///
/// Trailing bytes after the message are ignored.
///
/// # Errors
///
/// - `Truncated`: the buffer ends inside the message
/// - `UnexpectedMarker`: an element has the wrong msgpack type
/// - `UnexpectedArity`: the envelope is not a 2-element array
/// - `UnexpectedMessageType`: the tag is not [`SUBMIT_TAG`]
pub fn decode_submit(buf: &[u8]) -> Result<SubmitMessage<'_>, CodecError> {
    decode(buf).map(|(message, _)| message)
}

/// Try to decode a submission from a buffer that may hold a partial message.
///
/// # Returns
///
/// - `Ok(Some((message, consumed)))` if a complete message was parsed
/// - `Ok(None)` if more data is needed (not an error condition)
/// - `Err` if the data is malformed
///
/// # Examples
///
/// ```
/// use libpaxos::{serialize_submit, try_decode_submit};
///
/// let mut buf = Vec::new();
/// serialize_submit(b"value", &mut buf).expect("encode");
///
/// assert!(try_decode_submit(&buf[..4]).expect("partial").is_none());
///
/// let (message, consumed) = try_decode_submit(&buf).expect("complete").expect("message");
/// assert_eq!(message.value, b"value");
/// assert_eq!(consumed, buf.len());
/// ```
pub fn try_decode_submit(buf: &[u8]) -> Result<Option<(SubmitMessage<'_>, usize)>, CodecError> {
    match decode(buf) {
        Ok(decoded) => Ok(Some(decoded)),
        Err(CodecError::Truncated { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

fn decode(buf: &[u8]) -> Result<(SubmitMessage<'_>, usize), CodecError> {
    let mut rd = buf;

    let arity =
        rmp::decode::read_array_len(&mut rd).map_err(|e| value_error(e, buf, "array"))?;
    if arity != 2 {
        return Err(CodecError::UnexpectedArity(arity));
    }

    let tag: i64 = rmp::decode::read_int(&mut rd).map_err(|e| match e {
        // Anything above i64::MAX is not a known tag either way.
        NumValueReadError::OutOfRange => CodecError::UnexpectedMessageType(i64::MAX),
        NumValueReadError::TypeMismatch(marker) => unexpected(marker, "message type"),
        NumValueReadError::InvalidMarkerRead(_) | NumValueReadError::InvalidDataRead(_) => {
            truncated(buf)
        }
    })?;
    if tag != i64::from(SUBMIT_TAG) {
        return Err(CodecError::UnexpectedMessageType(tag));
    }

    // Peek at the marker to tell the framing apart; rmp reads it again.
    let (len, encoding) = match rd.first().copied().map(Marker::from_u8) {
        None => return Err(truncated(buf)),
        Some(Marker::Bin8 | Marker::Bin16 | Marker::Bin32) => {
            (rmp::decode::read_bin_len(&mut rd), BlobEncoding::Bin)
        }
        Some(Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32) => {
            (rmp::decode::read_str_len(&mut rd), BlobEncoding::Raw)
        }
        Some(other) => return Err(unexpected(other, "value blob")),
    };
    let len = len.map_err(|e| value_error(e, buf, "value blob"))?;

    let start = buf.len() - rd.len();
    let end = start.saturating_add(len as usize);
    if end > buf.len() {
        return Err(CodecError::Truncated {
            needed: end,
            have: buf.len(),
        });
    }

    Ok((
        SubmitMessage {
            message_type: SUBMIT_TAG,
            value: &buf[start..end],
            encoding,
        },
        end,
    ))
}

fn unexpected(marker: Marker, expected: &'static str) -> CodecError {
    CodecError::UnexpectedMarker {
        marker: marker.to_u8(),
        expected,
    }
}

/// Reading from a slice only fails when the input ends.
fn truncated(buf: &[u8]) -> CodecError {
    CodecError::Truncated {
        needed: buf.len() + 1,
        have: buf.len(),
    }
}

fn value_error(err: ValueReadError<io::Error>, buf: &[u8], expected: &'static str) -> CodecError {
    match err {
        ValueReadError::TypeMismatch(marker) => unexpected(marker, expected),
        ValueReadError::InvalidMarkerRead(_) | ValueReadError::InvalidDataRead(_) => truncated(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    /// Accepts `capacity` bytes, then fails every write.
    struct LimitedSink {
        buf: Vec<u8>,
        capacity: usize,
    }

    impl Write for LimitedSink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let room = self.capacity - self.buf.len();
            if room == 0 {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            let n = room.min(data.len());
            self.buf.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_hello_bin() {
        let mut buf = Vec::new();
        serialize_submit(b"hello", &mut buf).expect("encode");
        assert_eq!(buf, [0x92, 0x08, 0xc4, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_hello_raw() {
        let buf = SubmitEncoder::legacy()
            .encode_to_vec(b"hello")
            .expect("encode");
        assert_eq!(buf, [0x92, 0x08, 0xa5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn test_empty_value() {
        let bin = SubmitEncoder::default().encode_to_vec(b"").expect("encode");
        assert_eq!(bin, [0x92, 0x08, 0xc4, 0x00]);

        let raw = SubmitEncoder::legacy().encode_to_vec(b"").expect("encode");
        assert_eq!(raw, [0x92, 0x08, 0xa0]);

        for buf in [&bin, &raw] {
            let message = decode_submit(buf).expect("decode");
            assert!(message.value.is_empty());
        }
    }

    #[test]
    fn test_length_prefix_boundaries() {
        let cases: [(BlobEncoding, usize, &[u8]); 8] = [
            (BlobEncoding::Bin, 255, &[0xc4, 0xff]),
            (BlobEncoding::Bin, 256, &[0xc5, 0x01, 0x00]),
            (BlobEncoding::Bin, 65_535, &[0xc5, 0xff, 0xff]),
            (BlobEncoding::Bin, 65_536, &[0xc6, 0x00, 0x01, 0x00, 0x00]),
            (BlobEncoding::Raw, 31, &[0xbf]),
            (BlobEncoding::Raw, 32, &[0xda, 0x00, 0x20]),
            (BlobEncoding::Raw, 255, &[0xda, 0x00, 0xff]),
            (BlobEncoding::Raw, 65_536, &[0xdb, 0x00, 0x01, 0x00, 0x00]),
        ];

        for (blob, len, prefix) in cases {
            let encoder = SubmitEncoder::new(blob);
            let value = vec![0x5a; len];
            let buf = encoder.encode_to_vec(&value).expect("encode");

            assert_eq!(&buf[..2], &[0x92, 0x08], "{blob:?} {len}");
            assert_eq!(&buf[2..2 + prefix.len()], prefix, "{blob:?} {len}");
            assert_eq!(buf.len(), encoder.encoded_len(len), "{blob:?} {len}");

            let message = decode_submit(&buf).expect("decode");
            assert_eq!(message.value.len(), len);
            assert_eq!(message.encoding, blob);
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let encoder = SubmitEncoder::default();
        let a = encoder.encode_to_vec(b"same bytes").expect("encode");
        let b = encoder.encode_to_vec(b"same bytes").expect("encode");
        assert_eq!(a, b);
    }

    #[test]
    fn test_sink_failure_stops_encoding() {
        let mut sink = LimitedSink {
            buf: Vec::new(),
            capacity: 3,
        };

        let err = serialize_submit(b"hello", &mut sink).expect_err("sink is full");
        match err {
            CodecError::Sink(e) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected error: {other:?}"),
        }
        // No rollback: the prefix stays in the sink.
        assert_eq!(sink.buf, [0x92, 0x08, 0xc4]);
    }

    #[test]
    fn test_decode_accepts_predecessor_str8_and_wide_tag() {
        // str8 framing and an int32 tag, as written by other msgpack encoders.
        let buf = [0x92, 0xd2, 0x00, 0x00, 0x00, 0x08, 0xd9, 0x02, b'o', b'k'];
        let message = decode_submit(&buf).expect("decode");
        assert_eq!(message.message_type, SUBMIT_TAG);
        assert_eq!(message.value, b"ok");
        assert_eq!(message.encoding, BlobEncoding::Raw);
    }

    #[test]
    fn test_decode_rejects_other_message_types() {
        let buf = [0x92, 0x03, 0xc4, 0x00];
        assert!(matches!(
            decode_submit(&buf),
            Err(CodecError::UnexpectedMessageType(3))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_arity() {
        let buf = [0x93, 0x08, 0xc4, 0x00, 0xc0];
        assert!(matches!(
            decode_submit(&buf),
            Err(CodecError::UnexpectedArity(3))
        ));

        let map = [0x81, 0x08, 0xc4];
        assert!(matches!(
            decode_submit(&map),
            Err(CodecError::UnexpectedMarker { marker: 0x81, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unusable_tags() {
        let huge = [
            0x92, 0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc4, 0x00,
        ];
        assert!(matches!(
            decode_submit(&huge),
            Err(CodecError::UnexpectedMessageType(i64::MAX))
        ));

        let not_an_int = [0x92, 0xc4, 0x00, 0xc4, 0x00];
        assert!(matches!(
            decode_submit(&not_an_int),
            Err(CodecError::UnexpectedMarker {
                marker: 0xc4,
                expected: "message type"
            })
        ));
    }

    #[test]
    fn test_truncated_input() {
        let buf = serialize_submit_vec(b"truncate me");

        for cut in 0..buf.len() {
            assert!(matches!(
                decode_submit(&buf[..cut]),
                Err(CodecError::Truncated { .. })
            ));
            assert!(try_decode_submit(&buf[..cut]).expect("partial").is_none());
        }
    }

    #[test]
    fn test_try_decode_reports_consumed_with_trailing_data() {
        let mut buf = serialize_submit_vec(b"one");
        let first_len = buf.len();
        buf.extend(serialize_submit_vec(b"two"));

        let (first, consumed) = try_decode_submit(&buf)
            .expect("decode")
            .expect("complete");
        assert_eq!(first.value, b"one");
        assert_eq!(consumed, first_len);

        let (second, _) = try_decode_submit(&buf[consumed..])
            .expect("decode")
            .expect("complete");
        assert_eq!(second.value, b"two");
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_value_too_large() {
        assert!(check_value_len(MAX_VALUE_SIZE).is_ok());
        assert!(matches!(
            check_value_len(MAX_VALUE_SIZE + 1),
            Err(CodecError::ValueTooLarge { .. })
        ));
    }

    fn serialize_submit_vec(value: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        serialize_submit(value, &mut buf).expect("encode");
        buf
    }
}
