// Character decoding for the encodings the lexer accepts.

use crate::InputEncoding;

pub(crate) const BYTE_ORDER_MARK: char = '\u{FEFF}';

/// Result of decoding one character from the front of a byte slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Decoded {
    /// `None` when the bytes do not start with a valid encoding.
    pub character: Option<char>,
    /// Bytes consumed. Always at least 1 for a non-empty input.
    pub size: usize,
}

impl Decoded {
    const INVALID: Self = Self {
        character: None,
        size: 1,
    };
}

pub(crate) fn decode(encoding: InputEncoding, bytes: &[u8]) -> Decoded {
    match encoding {
        InputEncoding::Utf8 => decode_utf8(bytes),
        InputEncoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
        InputEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
    }
}

/// Longest byte sequence any supported encoding needs for one character.
pub(crate) const MAX_CHAR_BYTES: usize = 4;

fn utf8_width(lead: u8) -> usize {
    match lead {
        0x00..=0x7F => 1,
        0xC2..=0xDF => 2,
        0xE0..=0xEF => 3,
        0xF0..=0xF4 => 4,
        _ => 0,
    }
}

fn decode_utf8(bytes: &[u8]) -> Decoded {
    let Some(&lead) = bytes.first() else {
        return Decoded::INVALID;
    };
    let width = utf8_width(lead);
    if width == 0 || bytes.len() < width {
        return Decoded::INVALID;
    }
    match std::str::from_utf8(&bytes[..width]) {
        Ok(text) => Decoded {
            character: text.chars().next(),
            size: width,
        },
        Err(_) => Decoded::INVALID,
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Decoded {
    let read = |index: usize| -> Option<u16> {
        let pair = bytes.get(index..index + 2)?;
        Some(unit([pair[0], pair[1]]))
    };
    let Some(first) = read(0) else {
        return Decoded::INVALID;
    };
    let units = [Some(first), read(2)];
    let mut chars = char::decode_utf16(units.into_iter().flatten());
    match chars.next() {
        Some(Ok(c)) => Decoded {
            character: Some(c),
            size: c.len_utf16() * 2,
        },
        _ => Decoded {
            character: None,
            size: 2,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_multibyte_and_invalid() {
        assert_eq!(
            decode(InputEncoding::Utf8, "é!".as_bytes()),
            Decoded {
                character: Some('é'),
                size: 2
            }
        );
        assert_eq!(decode(InputEncoding::Utf8, &[0xFF, b'a']), Decoded::INVALID);
        // A truncated sequence is reported as invalid so the caller can refill.
        assert_eq!(decode(InputEncoding::Utf8, &[0xE2, 0x82]), Decoded::INVALID);
    }

    #[test]
    fn utf16_surrogate_pairs() {
        let mut bytes = Vec::new();
        for unit in "😀".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(
            decode(InputEncoding::Utf16Le, &bytes),
            Decoded {
                character: Some('😀'),
                size: 4
            }
        );

        let be = [0x00, b'x'];
        assert_eq!(decode(InputEncoding::Utf16Be, &be).character, Some('x'));

        // Lone high surrogate.
        assert_eq!(
            decode(InputEncoding::Utf16Le, &[0x3D, 0xD8]).character,
            None
        );
    }
}
