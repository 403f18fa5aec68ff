//! Just enough FITS header handling to locate image data.
//!
//! Headers are sequences of 80 character ASCII cards packed into 2880 byte
//! blocks and terminated by an `END` card. Only the value cards needed to
//! size HDUs and describe images are interpreted; everything else is kept as
//! raw text values or skipped.

#[cfg(any(test, feature = "testing"))]
pub mod writer;

use indexmap::IndexMap;

pub const BLOCK_LEN: u64 = 2880;
pub const CARD_LEN: usize = 80;

/// Round a byte length up to a whole number of FITS blocks. `None` if that
/// does not fit in a `u64`.
pub fn padded_len(len: u64) -> Option<u64> {
    len.div_ceil(BLOCK_LEN).checked_mul(BLOCK_LEN)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

#[derive(Debug, Clone, Default)]
pub struct FitsHeader {
    first_keyword: String,
    cards: IndexMap<String, CardValue>,
}

/// Result of scanning a byte buffer for a complete header.
#[derive(Debug)]
pub enum HeaderScan {
    /// `len` is the header size in bytes, a multiple of [`BLOCK_LEN`].
    Complete { header: FitsHeader, len: u64 },
    /// No `END` card in the complete blocks available.
    Incomplete,
}

impl FitsHeader {
    /// Keyword of the first card, `SIMPLE` for primary HDUs and `XTENSION`
    /// for extensions.
    pub fn first_keyword(&self) -> &str {
        &self.first_keyword
    }

    pub fn get(&self, keyword: &str) -> Option<&CardValue> {
        self.cards.get(keyword)
    }

    pub fn integer(&self, keyword: &str) -> Option<i64> {
        match self.get(keyword)? {
            CardValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric value, integers included.
    pub fn real(&self, keyword: &str) -> Option<f64> {
        match self.get(keyword)? {
            CardValue::Integer(v) => Some(*v as f64),
            CardValue::Real(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, keyword: &str) -> Option<&str> {
        match self.get(keyword)? {
            CardValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn logical(&self, keyword: &str) -> Option<bool> {
        match self.get(keyword)? {
            CardValue::Logical(v) => Some(*v),
            _ => None,
        }
    }

    /// `NAXIS1..NAXISn`, fastest varying axis first.
    pub fn axes(&self) -> Result<Vec<u64>, String> {
        let naxis = self
            .integer("NAXIS")
            .ok_or_else(|| "missing NAXIS".to_string())?;
        if !(0..=999).contains(&naxis) {
            return Err(format!("NAXIS {naxis} out of range"));
        }
        (1..=naxis)
            .map(|n| {
                let keyword = format!("NAXIS{n}");
                match self.integer(&keyword) {
                    Some(v) if v >= 0 => Ok(v as u64),
                    Some(v) => Err(format!("{keyword} is negative ({v})")),
                    None => Err(format!("missing {keyword}")),
                }
            })
            .collect()
    }

    pub fn bitpix(&self) -> Result<i64, String> {
        let bitpix = self
            .integer("BITPIX")
            .ok_or_else(|| "missing BITPIX".to_string())?;
        match bitpix {
            8 | 16 | 32 | 64 | -32 | -64 => Ok(bitpix),
            other => Err(format!("invalid BITPIX {other}")),
        }
    }

    /// Size of the data unit following this header, without block padding.
    pub fn data_len(&self) -> Result<u64, String> {
        let bytes_per_value = self.bitpix()?.unsigned_abs() / 8;
        let axes = self.axes()?;
        if axes.is_empty() {
            return Ok(0);
        }
        // Random groups store NAXIS1 = 0 and do not count it.
        let counted = if axes[0] == 0 && self.logical("GROUPS") == Some(true) {
            &axes[1..]
        } else {
            &axes[..]
        };
        let pcount = self.integer("PCOUNT").unwrap_or(0).max(0) as u64;
        let gcount = self.integer("GCOUNT").unwrap_or(1).max(0) as u64;
        counted
            .iter()
            .try_fold(1u64, |acc, n| acc.checked_mul(*n))
            .and_then(|values| values.checked_add(pcount))
            .and_then(|values| values.checked_mul(gcount))
            .and_then(|values| values.checked_mul(bytes_per_value))
            .ok_or_else(|| "data size overflows".to_string())
    }
}

/// Scans one header block by block.
///
/// Blocks can be fed as they arrive: every call continues after the cards
/// the previous calls consumed, so nothing is scanned twice.
#[derive(Debug, Default)]
pub struct HeaderScanner {
    header: FitsHeader,
    cards: usize,
}

impl HeaderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes consumed so far, always whole blocks until `END` is found.
    pub fn scanned_len(&self) -> u64 {
        (self.cards * CARD_LEN) as u64
    }

    /// Scan the complete blocks of `bytes`, which must start right after the
    /// bytes already scanned. A trailing partial block is left for the next
    /// call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<HeaderScan, String> {
        let complete = bytes.len() / BLOCK_LEN as usize * BLOCK_LEN as usize;

        for card in bytes[..complete].chunks_exact(CARD_LEN) {
            let card_index = self.cards;
            self.cards += 1;
            if !card.is_ascii() {
                return Err(format!("non-ASCII byte in card {card_index}"));
            }
            // Checked ASCII above, so this cannot fail.
            let card = std::str::from_utf8(card).map_err(|e| e.to_string())?;
            let keyword = card[..8].trim_end();

            if card_index == 0 {
                self.header.first_keyword = keyword.to_string();
            }
            if keyword == "END" {
                let blocks = (card_index * CARD_LEN) as u64 / BLOCK_LEN + 1;
                return Ok(HeaderScan::Complete {
                    header: std::mem::take(&mut self.header),
                    len: blocks * BLOCK_LEN,
                });
            }
            if keyword.is_empty() || &card[8..10] != "= " {
                continue;
            }
            if let Some(value) = parse_value(&card[10..]) {
                self.header.cards.insert(keyword.to_string(), value);
            }
        }

        Ok(HeaderScan::Incomplete)
    }
}

/// Scan `bytes`, which must start at a header boundary, for one header.
pub fn scan_header(bytes: &[u8]) -> Result<HeaderScan, String> {
    HeaderScanner::new().feed(bytes)
}

fn parse_value(raw: &str) -> Option<CardValue> {
    let raw = raw.trim_start();
    if let Some(rest) = raw.strip_prefix('\'') {
        let mut text = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    text.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                text.push(c);
            }
        }
        return Some(CardValue::Text(text.trim_end().to_string()));
    }

    let token = raw.split('/').next().unwrap_or_default().trim();
    match token {
        "" => None,
        "T" => Some(CardValue::Logical(true)),
        "F" => Some(CardValue::Logical(false)),
        _ => token
            .parse::<i64>()
            .map(CardValue::Integer)
            .ok()
            .or_else(|| token.replace(['D', 'd'], "E").parse::<f64>().ok().map(CardValue::Real)),
    }
}
