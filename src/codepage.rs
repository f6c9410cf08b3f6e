//! Single-byte code pages for printing text.
//!
//! The printer is switched to a table with `ESC t n` before any text is sent;
//! [`CodePage::encode`] turns a line into bytes of that table, or reports that
//! the line contains a character the table cannot represent.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CodePage {
    /// ISO-8859-6 (Latin/Arabic).
    #[default]
    #[serde(rename = "iso-8859-6")]
    Iso8859_6,
    /// IBM code page 437.
    #[serde(rename = "cp437")]
    Cp437,
}

impl CodePage {
    /// Table number `n` for the `ESC t n` select command.
    pub fn table_index(self) -> u8 {
        match self {
            CodePage::Iso8859_6 => 28,
            CodePage::Cp437 => 0,
        }
    }

    /// Encode `s` in this code page.
    ///
    /// Returns `None` if any character has no representation; a partially
    /// encoded line is never returned.
    pub fn encode(self, s: &str) -> Option<Vec<u8>> {
        let table: &HashMap<char, u8> = match self {
            CodePage::Iso8859_6 => &ISO_8859_6,
            CodePage::Cp437 => &CP437,
        };
        s.chars()
            .map(|ch| {
                if (ch as u32) < 0x80 {
                    Some(ch as u8)
                } else {
                    table.get(&ch).copied()
                }
            })
            .collect()
    }
}

/// Upper half of ISO-8859-6. Bytes 0x80-0x9F are C1 controls and map 1:1.
static ISO_8859_6: Lazy<HashMap<char, u8>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for byte in 0x80u8..=0xA0 {
        map.insert(char::from(byte), byte);
    }
    map.insert('\u{00A4}', 0xA4);
    map.insert('\u{060C}', 0xAC); // arabic comma
    map.insert('\u{00AD}', 0xAD);
    map.insert('\u{061B}', 0xBB); // arabic semicolon
    map.insert('\u{061F}', 0xBF); // arabic question mark
    // hamza through ghain
    for (i, byte) in (0xC1u8..=0xDA).enumerate() {
        if let Some(ch) = char::from_u32(0x0621 + i as u32) {
            map.insert(ch, byte);
        }
    }
    // tatweel through sukun
    for (i, byte) in (0xE0u8..=0xF2).enumerate() {
        if let Some(ch) = char::from_u32(0x0640 + i as u32) {
            map.insert(ch, byte);
        }
    }
    map
});

/// CP437 upper half, indexed from 0x80.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{00A0}',
];

static CP437: Lazy<HashMap<char, u8>> = Lazy::new(|| {
    CP437_HIGH
        .iter()
        .enumerate()
        .map(|(i, &ch)| (ch, 0x80 + i as u8))
        .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        assert_eq!(
            CodePage::Iso8859_6.encode("Total: 12.50"),
            Some(b"Total: 12.50".to_vec())
        );
        assert_eq!(CodePage::Cp437.encode("abc"), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_arabic_letters() {
        // alef, lam, meem
        assert_eq!(
            CodePage::Iso8859_6.encode("\u{0627}\u{0644}\u{0645}"),
            Some(vec![0xC7, 0xE4, 0xE5])
        );
        assert_eq!(CodePage::Iso8859_6.encode("\u{061F}"), Some(vec![0xBF]));
    }

    #[test]
    fn test_unrepresentable_line_is_rejected() {
        assert_eq!(CodePage::Iso8859_6.encode("café"), None);
        assert_eq!(CodePage::Cp437.encode("\u{0627}"), None);
    }

    #[test]
    fn test_cp437_upper_half() {
        assert_eq!(CodePage::Cp437.encode("é°"), Some(vec![0x82, 0xF8]));
        assert_eq!(CodePage::Cp437.encode("═"), Some(vec![0xCD]));
    }

    #[test]
    fn test_table_index() {
        assert_eq!(CodePage::Iso8859_6.table_index(), 28);
        assert_eq!(CodePage::Cp437.table_index(), 0);
    }
}
