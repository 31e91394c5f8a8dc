//! Utility functions for Distinguished Encoding Rules.
//!
//! The structures exchanged during PACE are small and use implicit context-specific tags without a
//! surrounding SEQUENCE, so they are assembled and taken apart by hand using these helpers.


/// Encode an ASN.1 DER primitive value length.
pub fn encode_primitive_length(output: &mut Vec<u8>, length: usize) {
    if length < 128 {
        // single-byte encoding
        output.push(length as u8);
    } else {
        // 0b1nnn_nnnn and then n additional bytes that actually specify the length
        // (big-endian)
        let length_bytes = length.to_be_bytes();
        let leading_zeroes = length_bytes.iter().take_while(|b| **b == 0x00).count();
        let trimmed_length_slice = &length_bytes[leading_zeroes..];
        output.push(0b1000_0000 | (trimmed_length_slice.len() as u8));
        output.extend(trimmed_length_slice);
    }
}


/// Decode an ASN.1 DER primitive value length.
///
/// The length must be at the beginning of the input slice and must be encoded in the shortest
/// possible form.
///
/// Returns a tuple `(length, rest)` where `rest` is the rest of the input slice once the length has
/// been removed.
pub fn try_decode_primitive_length(input: &[u8]) -> Option<(usize, &[u8])> {
    let (&start_byte, rest) = input.split_first()?;
    let start_lower_bits = start_byte & 0b0111_1111;
    if start_byte & 0b1000_0000 != 0 {
        // multiple bytes
        let length_byte_count: usize = start_lower_bits.into();
        if length_byte_count == 0 || length_byte_count > rest.len() {
            // indefinite length (not DER) or that will never fit
            return None;
        }
        let length_bytes = &rest[..length_byte_count];
        if length_bytes[0] == 0x00 {
            // leading zero byte: not the shortest encoding
            return None;
        }
        let mut length: usize = 0;
        for length_byte in length_bytes {
            length = length.checked_mul(256)?;
            length = length.checked_add(usize::from(*length_byte))?;
        }
        if length < 128 {
            // fits into the short form
            return None;
        }
        Some((length, &rest[length_byte_count..]))
    } else {
        Some((start_lower_bits.into(), rest))
    }
}


/// A tag-length-value triple borrowed from a larger buffer.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BorrowedTlv<'d> {
    /// The tag; two-byte tags (first byte `0bxxx1_1111`) are stored big-endian.
    pub tag: u16,
    pub value: &'d [u8],
}


/// Splits the first BER-TLV off the given slice.
///
/// Tags of one or two bytes are supported, which covers everything PACE and ISO/IEC 7816-4 use.
/// Returns the TLV and the remaining bytes, or `None` if the slice does not start with a complete
/// TLV.
pub fn try_split_tlv(input: &[u8]) -> Option<(BorrowedTlv<'_>, &[u8])> {
    let (&first_tag_byte, mut rest) = input.split_first()?;
    let tag = if first_tag_byte & 0b0001_1111 == 0b0001_1111 {
        let (&second_tag_byte, after_tag) = rest.split_first()?;
        if second_tag_byte & 0b1000_0000 != 0 {
            // three-byte tags and longer
            return None;
        }
        rest = after_tag;
        u16::from_be_bytes([first_tag_byte, second_tag_byte])
    } else {
        u16::from(first_tag_byte)
    };

    let (length, rest) = try_decode_primitive_length(rest)?;
    if length > rest.len() {
        return None;
    }
    let (value, rest) = rest.split_at(length);
    Some((BorrowedTlv { tag, value }, rest))
}


/// Appends a complete TLV with a single-byte tag.
pub fn encode_tlv(output: &mut Vec<u8>, tag: u8, value: &[u8]) {
    output.push(tag);
    encode_primitive_length(output, value.len());
    output.extend(value);
}


/// Encode the contents octets of an INTEGER using DER rules (minimal two's complement).
pub fn integer_to_der_bytes(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0;
        if !redundant_zero && !redundant_ones {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}


/// Encode the arcs of an object identifier into bytes using DER encoding rules.
///
/// `Oid` and `ObjectIdentifier` dereference to their arcs, so both can be passed directly. No tag
/// or length is encoded, only the actual value. Returns `None` if the object identifier
/// cannot be represented: it has fewer than two arcs, the first arc is greater than 2, or the
/// second arc is greater than 39 under a first arc of 0 or 1.
pub fn oid_to_der_bytes(oid: &[u32]) -> Option<Vec<u8>> {
    const SEVEN_BIT_MASK: u32 = 0b0111_1111;
    const TOP_BIT: u8 = 0b1000_0000;

    if oid.len() < 2 || oid[0] > 2 {
        return None;
    }
    if oid[0] < 2 && oid[1] > 39 {
        return None;
    }

    fn encode_arc(ret: &mut Vec<u8>, arc: u32) {
        // base-128, most significant group first, continuation bit on all but the last
        let mut groups = [0u8; 5];
        let mut group_count = 0;
        let mut remaining = arc;
        loop {
            groups[group_count] = (remaining & SEVEN_BIT_MASK) as u8;
            group_count += 1;
            remaining >>= 7;
            if remaining == 0 {
                break;
            }
        }
        for i in (0..group_count).rev() {
            if i == 0 {
                ret.push(groups[i]);
            } else {
                ret.push(groups[i] | TOP_BIT);
            }
        }
    }

    let first_arc_pair = 40u32.checked_mul(oid[0])?.checked_add(oid[1])?;
    let mut ret = Vec::new();
    encode_arc(&mut ret, first_arc_pair);
    for arc in oid.iter().skip(2) {
        encode_arc(&mut ret, *arc);
    }
    Some(ret)
}


/// Decode the contents octets of an OBJECT IDENTIFIER.
pub fn oid_from_der_bytes(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.is_empty() || bytes[bytes.len() - 1] & 0b1000_0000 != 0 {
        return None;
    }

    let mut sub_identifiers = Vec::new();
    let mut current: u32 = 0;
    for &b in bytes {
        current = current.checked_mul(128)?;
        current |= u32::from(b & 0b0111_1111);
        if b & 0b1000_0000 == 0 {
            sub_identifiers.push(current);
            current = 0;
        }
    }

    let first = sub_identifiers[0];
    let (arc0, arc1) = if first < 40 {
        (0, first)
    } else if first < 80 {
        (1, first - 40)
    } else {
        (2, first - 80)
    };
    let mut arcs = Vec::with_capacity(sub_identifiers.len() + 1);
    arcs.push(arc0);
    arcs.push(arc1);
    arcs.extend(&sub_identifiers[1..]);
    Some(arcs)
}
