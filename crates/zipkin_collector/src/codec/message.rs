//! Framing of already-encoded spans into one message.
//!
//! JSON messages are the items joined by `,` inside `[` and `]` with no
//! whitespace. Thrift messages are a `list<struct>` header (element type
//! byte, big-endian `i32` count) followed by the items back to back.

use super::{thrift, Encoding};

/// Thrift type id of a struct, the element type of a span list
pub(crate) const THRIFT_STRUCT: u8 = 12;

/// Frames `items` as a single message in `encoding`.
pub fn encode<T: AsRef<[u8]>>(encoding: Encoding, items: &[T]) -> Vec<u8> {
    match encoding {
        Encoding::Thrift => encode_thrift_list(items),
        Encoding::JsonV1 | Encoding::JsonV2 => encode_json_list(items),
    }
}

/// Frames `items` as a JSON array.
pub fn encode_json_list<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    let size = 2 + items.iter().map(|item| item.as_ref().len() + 1).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    out.push(b'[');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.extend_from_slice(item.as_ref());
    }
    out.push(b']');
    out
}

/// Frames `items` as a thrift `list<struct>`.
pub fn encode_thrift_list<T: AsRef<[u8]>>(items: &[T]) -> Vec<u8> {
    let size = 5 + items.iter().map(|item| item.as_ref().len()).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    thrift::write_list_header(&mut out, items.len());
    for item in items {
        out.extend_from_slice(item.as_ref());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_list() {
        let items: [&[u8]; 0] = [];
        assert_eq!(encode(Encoding::JsonV2, &items), b"[]");
    }

    #[test]
    fn test_singleton_json_list() {
        assert_eq!(encode(Encoding::JsonV2, &[b"1"]), b"[1]");
    }

    #[test]
    fn test_multiple_json_items() {
        assert_eq!(encode(Encoding::JsonV1, &[b"3", b"4", b"5"]), b"[3,4,5]");
    }

    #[test]
    fn test_thrift_list_header() {
        assert_eq!(
            encode(Encoding::Thrift, &[&[1u8, 2][..], &[3u8][..]]),
            [12u8, 0, 0, 0, 2, 1, 2, 3]
        );
        let items: [&[u8]; 0] = [];
        assert_eq!(encode(Encoding::Thrift, &items), [12u8, 0, 0, 0, 0]);
    }
}
