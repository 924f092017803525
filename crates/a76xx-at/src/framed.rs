//! Fixed-capacity fields decoded from length-prefixed payloads.
//!
//! The modem announces a length, then sends that many raw bytes. When the
//! announced length does not fit a field the head is discarded and the tail
//! kept. This is a silent data-loss path, not an error: the field records the
//! declared length so callers can tell a truncated value from a complete one.

use std::fmt;

use crate::error::AtResult;
use crate::stream::Stream;

/// A NUL-terminated byte field with `N` bytes of storage, one of which is
/// reserved for the terminator.
#[derive(Clone, PartialEq, Eq)]
pub struct FixedField<const N: usize> {
    data: [u8; N],
    /// Number of payload bytes stored, at most `N - 1`.
    len: usize,
    /// Length announced on the wire.
    declared: usize,
}

impl<const N: usize> Default for FixedField<N> {
    fn default() -> Self {
        FixedField {
            data: [0; N],
            len: 0,
            declared: 0,
        }
    }
}

impl<const N: usize> fmt::Debug for FixedField<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedField")
            .field("value", &String::from_utf8_lossy(self.as_bytes()))
            .field("declared", &self.declared)
            .finish()
    }
}

impl<const N: usize> FixedField<N> {
    /// Total storage, including the terminator.
    pub const CAPACITY: usize = N;

    /// Read a field of `declared` raw bytes from the stream.
    ///
    /// A declared length below `N` is stored whole. Anything longer keeps only
    /// the last `N - 1` bytes.
    pub fn read_from(stream: &mut Stream<'_>, declared: usize) -> AtResult<Self> {
        let mut field = FixedField {
            declared,
            ..Self::default()
        };
        if N == 0 {
            stream.skip(declared)?;
            return Ok(field);
        }
        let keep = declared.min(N.saturating_sub(1));
        if declared >= N {
            stream.skip(declared - keep)?;
        }
        stream.read_into(&mut field.data[..keep])?;
        field.len = keep;
        Ok(field)
    }

    /// Build a field from an in-memory value with the same truncation rule.
    pub fn from_slice(value: &[u8]) -> Self {
        let mut field = FixedField {
            declared: value.len(),
            ..Self::default()
        };
        if N == 0 {
            return field;
        }
        let keep = value.len().min(N.saturating_sub(1));
        let start = if value.len() >= N { value.len() - keep } else { 0 };
        field.data[..keep].copy_from_slice(&value[start..start + keep]);
        field.len = keep;
        field
    }

    /// Stored payload, without the terminator.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Stored payload followed by its NUL terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        if N == 0 {
            return &[];
        }
        &self.data[..=self.len]
    }

    /// Stored payload as text, replacing invalid UTF-8.
    pub fn as_str(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).to_string()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Length announced on the wire.
    pub fn declared_len(&self) -> usize {
        self.declared
    }

    /// Whether part of the declared payload was discarded.
    pub fn is_truncated(&self) -> bool {
        self.declared > self.len
    }
}

/// A topic/body pair decoded from one notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FramedMessage<const T: usize, const B: usize> {
    pub topic: FixedField<T>,
    pub body: FixedField<B>,
}

impl<const T: usize, const B: usize> FramedMessage<T, B> {
    pub fn new(topic: FixedField<T>, body: FixedField<B>) -> Self {
        FramedMessage { topic, body }
    }

    /// Whether either field lost bytes to truncation.
    pub fn is_truncated(&self) -> bool {
        self.topic.is_truncated() || self.body.is_truncated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::time::Duration;

    fn read_field<const N: usize>(input: &[u8], declared: usize) -> (FixedField<N>, usize) {
        let mut transport = MockTransport::with_input(input);
        let remote = transport.clone();
        let mut lookahead = None;
        let mut stream = Stream::new(
            &mut transport,
            &mut lookahead,
            Duration::ZERO,
            Duration::from_millis(20),
        );
        let field = FixedField::<N>::read_from(&mut stream, declared).unwrap();
        (field, remote.pending())
    }

    #[test]
    fn test_short_value_stored_whole() {
        let (field, left) = read_field::<8>(b"abc\r\n", 3);
        assert_eq!(field.as_bytes(), b"abc");
        assert_eq!(field.as_bytes_with_nul(), b"abc\0");
        assert!(!field.is_truncated());
        assert_eq!(left, 2);
    }

    #[test]
    fn test_oversized_value_keeps_tail() {
        const CAP: usize = 8;
        let source = b"0123456789ABC";
        assert_eq!(source.len(), CAP + 5);

        let (field, left) = read_field::<CAP>(source, source.len());
        assert_eq!(field.as_bytes(), &source[source.len() - (CAP - 1)..]);
        assert_eq!(field.as_bytes(), b"6789ABC");
        assert_eq!(field.as_bytes_with_nul().last(), Some(&0));
        assert_eq!(field.len(), CAP - 1);
        assert_eq!(field.declared_len(), CAP + 5);
        assert!(field.is_truncated());
        assert_eq!(left, 0);
    }

    #[test]
    fn test_declared_equal_to_capacity_truncates_one() {
        let (field, _) = read_field::<4>(b"wxyz", 4);
        assert_eq!(field.as_bytes(), b"xyz");
        assert!(field.is_truncated());
    }

    #[test]
    fn test_from_slice_matches_stream_rule() {
        let field = FixedField::<4>::from_slice(b"abcdef");
        assert_eq!(field.as_str(), "def");
        let field = FixedField::<4>::from_slice(b"ab");
        assert_eq!(field.as_str(), "ab");
    }

    #[test]
    fn test_zero_capacity_skips() {
        let (field, left) = read_field::<0>(b"abc", 3);
        assert!(field.is_empty());
        assert!(field.as_bytes_with_nul().is_empty());
        assert_eq!(left, 0);
    }
}
