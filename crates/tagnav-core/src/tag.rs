//! Tag records and page content stored in tag user memory.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use crate::protocol::constants::BLOCK_SIZE;

/// Coarse classification derived from SENS_RES.
///
/// SENS_RES (ATQA) describes the tag type, not the field strength; this is an
/// ordering hint only and never a distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Strong,
    Medium,
    Weak,
}

impl SignalStrength {
    pub fn from_sens_res(sens_res: u16) -> Self {
        if sens_res > 0x0040 {
            SignalStrength::Strong
        } else if sens_res > 0x0020 {
            SignalStrength::Medium
        } else {
            SignalStrength::Weak
        }
    }
}

impl fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStrength::Strong => write!(f, "strong"),
            SignalStrength::Medium => write!(f, "medium"),
            SignalStrength::Weak => write!(f, "weak"),
        }
    }
}

/// One ISO14443 Type A target reported by InListPassiveTarget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// Logical target number (Tg) assigned by the PN532.
    pub target: u8,
    pub sens_res: u16,
    pub sel_res: u8,
    pub uid: Vec<u8>,
    /// Lowercase hex of `uid`; the mapping key.
    pub uid_hex: String,
    /// Answer To Select, present for ISO-DEP tags.
    pub ats: Option<Vec<u8>>,
    pub signal: SignalStrength,
    pub detected_at: Instant,
}

impl TagRecord {
    pub fn new(target: u8, sens_res: u16, sel_res: u8, uid: &[u8], detected_at: Instant) -> Self {
        Self {
            target,
            sens_res,
            sel_res,
            uid: uid.to_vec(),
            uid_hex: uid_hex(uid),
            ats: None,
            signal: SignalStrength::from_sens_res(sens_res),
            detected_at,
        }
    }
}

/// Lowercase hex string of a UID.
pub fn uid_hex(uid: &[u8]) -> String {
    uid.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Normalise an operator-typed UID (`04:A2:...`, `04 a2 ...`) to mapping form.
pub fn normalize_uid(text: &str) -> Option<String> {
    let hex: String = text
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect::<String>()
        .to_ascii_lowercase();
    if hex.is_empty() || hex.len() % 2 != 0 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(hex)
}

/// Page marker written into tag user memory.
///
/// ```text
/// [page, total_pages, text_len, 0x00, text (up to 12 bytes)]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBlock {
    pub page: u8,
    pub total_pages: u8,
    pub text: String,
}

impl PageBlock {
    /// Page, total, text length and a reserved zero byte. On NTAG21x a
    /// block write stores only these four bytes.
    pub const HEADER_LEN: usize = 4;
    const TEXT_OFFSET: usize = Self::HEADER_LEN;
    const TEXT_MAX: usize = BLOCK_SIZE - Self::TEXT_OFFSET;

    pub fn new(page: u8, total_pages: u8) -> Self {
        Self {
            page,
            total_pages,
            text: format!("Page {}", page),
        }
    }

    pub fn to_bytes(&self) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        let text = truncate_utf8(&self.text, Self::TEXT_MAX);
        block[0] = self.page;
        block[1] = self.total_pages;
        block[2] = text.len() as u8;
        block[Self::TEXT_OFFSET..Self::TEXT_OFFSET + text.len()].copy_from_slice(text.as_bytes());
        block
    }

    pub fn from_bytes(block: &[u8]) -> Option<Self> {
        if block.len() < Self::TEXT_OFFSET {
            return None;
        }
        let (page, total_pages, reserved) = (block[0], block[1], block[3]);
        let text_len = block[2] as usize;
        if page == 0 || total_pages == 0 || reserved != 0 {
            return None;
        }
        if text_len == 0 || text_len > Self::TEXT_MAX {
            return None;
        }
        let text = block.get(Self::TEXT_OFFSET..Self::TEXT_OFFSET + text_len)?;
        Some(Self {
            page,
            total_pages,
            text: String::from_utf8_lossy(text).into_owned(),
        })
    }
}

fn truncate_utf8(text: &str, max: usize) -> &str {
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Derive a page number from a tag's user-memory block.
///
/// Accepts the [`PageBlock`] layout and the text forms `"3"`, `"第3页"`,
/// `"Page 3"` and URIs containing `page=3`. Pages outside
/// `1..=total_pages` are ignored.
pub fn parse_page_content(block: &[u8], total_pages: u32) -> Option<u32> {
    let in_range = |page: u32| (1..=total_pages).contains(&page).then_some(page);

    if let Some(marker) = PageBlock::from_bytes(block)
        && let Some(page) = in_range(marker.page as u32)
    {
        return Some(page);
    }

    let text = String::from_utf8_lossy(block);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let number = |s: &str| -> Option<u32> {
        let s = s.trim();
        if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
            s.parse().ok()
        } else {
            None
        }
    };

    if let Some(page) = number(text) {
        return in_range(page);
    }
    if let Some(inner) = text.strip_prefix('第').and_then(|t| t.strip_suffix('页')) {
        return number(inner).and_then(in_range);
    }
    let lower = text.to_lowercase();
    if let Some(rest) = lower.strip_prefix("page ") {
        return number(rest).and_then(in_range);
    }
    if let Some((_, rest)) = lower.split_once("page=") {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        return number(&digits).and_then(in_range);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_block(text: &str) -> Vec<u8> {
        let mut block = text.as_bytes().to_vec();
        block.resize(BLOCK_SIZE, 0);
        block
    }

    #[test]
    fn test_uid_hex_lowercase() {
        assert_eq!(uid_hex(&[0x04, 0xA2, 0xFF, 0x10]), "04a2ff10");
    }

    #[test]
    fn test_normalize_uid() {
        assert_eq!(normalize_uid("04:A2:FF:10").as_deref(), Some("04a2ff10"));
        assert_eq!(normalize_uid("04a2ff10").as_deref(), Some("04a2ff10"));
        assert_eq!(normalize_uid("04a2f"), None);
        assert_eq!(normalize_uid("zz"), None);
        assert_eq!(normalize_uid(""), None);
    }

    #[test]
    fn test_signal_strength_thresholds() {
        assert_eq!(SignalStrength::from_sens_res(0x0044), SignalStrength::Strong);
        assert_eq!(SignalStrength::from_sens_res(0x0040), SignalStrength::Medium);
        assert_eq!(SignalStrength::from_sens_res(0x0021), SignalStrength::Medium);
        assert_eq!(SignalStrength::from_sens_res(0x0004), SignalStrength::Weak);
    }

    #[test]
    fn test_page_block_layout() {
        let block = PageBlock::new(3, 10).to_bytes();
        assert_eq!(&block[..4], &[3, 10, 6, 0]);
        assert_eq!(&block[4..10], b"Page 3");
        assert_eq!(PageBlock::from_bytes(&block), Some(PageBlock::new(3, 10)));
    }

    #[test]
    fn test_page_block_truncates_on_char_boundary() {
        let marker = PageBlock {
            page: 1,
            total_pages: 2,
            text: "第一页第一页".to_string(),
        };
        let block = marker.to_bytes();
        assert_eq!(block[2], 12);
        assert_eq!(PageBlock::from_bytes(&block).unwrap().text, "第一页第");
    }

    #[test]
    fn test_parse_page_content_forms() {
        assert_eq!(parse_page_content(&PageBlock::new(4, 10).to_bytes(), 10), Some(4));
        assert_eq!(parse_page_content(&text_block("7"), 10), Some(7));
        assert_eq!(parse_page_content(&text_block("第2页"), 10), Some(2));
        assert_eq!(parse_page_content(&text_block("PAGE 9"), 10), Some(9));
        assert_eq!(parse_page_content(&text_block("x.io/?page=5&a"), 10), Some(5));
    }

    #[test]
    fn test_parse_page_content_rejects() {
        assert_eq!(parse_page_content(&PageBlock::new(11, 12).to_bytes(), 10), None);
        assert_eq!(parse_page_content(&text_block("0"), 10), None);
        assert_eq!(parse_page_content(&text_block("hello"), 10), None);
        assert_eq!(parse_page_content(&[0u8; BLOCK_SIZE], 10), None);
        assert_eq!(parse_page_content(&[0xFFu8; BLOCK_SIZE], 10), None);
    }
}
