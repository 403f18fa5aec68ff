//! Minimal FITS writer for fixtures and synthetic test objects.

use super::{BLOCK_LEN, CARD_LEN, CardValue};

/// Builds a FITS byte stream HDU by HDU.
///
/// The first HDU appended becomes the primary HDU. Headers and data units are
/// padded to whole blocks, headers with spaces and data with zeros.
#[derive(Debug, Default)]
pub struct FitsBuilder {
    bytes: Vec<u8>,
    hdus: usize,
}

impl FitsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header-only primary HDU, as used by files that keep images in extensions.
    pub fn empty_primary(mut self) -> Self {
        let cards = vec![
            ("SIMPLE".to_string(), CardValue::Logical(true)),
            ("BITPIX".to_string(), CardValue::Integer(8)),
            ("NAXIS".to_string(), CardValue::Integer(0)),
            ("EXTEND".to_string(), CardValue::Logical(true)),
        ];
        self.push_hdu(&cards, &[]);
        self
    }

    /// Image HDU. `naxes` is in FITS order, `NAXIS1` (fastest varying) first,
    /// and `data` holds the big endian pixel values.
    pub fn image(
        mut self,
        extname: Option<&str>,
        bitpix: i64,
        naxes: &[u64],
        extra: &[(&str, CardValue)],
        data: &[u8],
    ) -> Self {
        let mut cards = Vec::new();
        if self.hdus == 0 {
            cards.push(("SIMPLE".to_string(), CardValue::Logical(true)));
        } else {
            cards.push(("XTENSION".to_string(), CardValue::Text("IMAGE".to_string())));
        }
        cards.push(("BITPIX".to_string(), CardValue::Integer(bitpix)));
        cards.push(("NAXIS".to_string(), CardValue::Integer(naxes.len() as i64)));
        for (i, n) in naxes.iter().enumerate() {
            cards.push((format!("NAXIS{}", i + 1), CardValue::Integer(*n as i64)));
        }
        if self.hdus > 0 {
            cards.push(("PCOUNT".to_string(), CardValue::Integer(0)));
            cards.push(("GCOUNT".to_string(), CardValue::Integer(1)));
        }
        if let Some(name) = extname {
            cards.push(("EXTNAME".to_string(), CardValue::Text(name.to_string())));
        }
        cards.extend(extra.iter().map(|(k, v)| (k.to_string(), v.clone())));

        debug_assert_eq!(
            Some(data.len() as u64),
            naxes
                .iter()
                .try_fold(bitpix.unsigned_abs() / 8, |acc, n| acc.checked_mul(*n))
        );
        self.push_hdu(&cards, data);
        self
    }

    /// Binary table extension filled with zeros; only its size matters.
    pub fn table(mut self, extname: &str, row_len: u64, rows: u64) -> Self {
        let cards = vec![
            ("XTENSION".to_string(), CardValue::Text("BINTABLE".to_string())),
            ("BITPIX".to_string(), CardValue::Integer(8)),
            ("NAXIS".to_string(), CardValue::Integer(2)),
            ("NAXIS1".to_string(), CardValue::Integer(row_len as i64)),
            ("NAXIS2".to_string(), CardValue::Integer(rows as i64)),
            ("PCOUNT".to_string(), CardValue::Integer(0)),
            ("GCOUNT".to_string(), CardValue::Integer(1)),
            ("TFIELDS".to_string(), CardValue::Integer(0)),
            ("EXTNAME".to_string(), CardValue::Text(extname.to_string())),
        ];
        self.push_hdu(&cards, &vec![0u8; (row_len * rows) as usize]);
        self
    }

    /// Byte offset at which the next HDU will start.
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }

    fn push_hdu(&mut self, cards: &[(String, CardValue)], data: &[u8]) {
        for (keyword, value) in cards {
            self.bytes.extend_from_slice(format_card(keyword, value).as_bytes());
        }
        self.bytes
            .extend_from_slice(format!("{:<width$}", "END", width = CARD_LEN).as_bytes());
        pad(&mut self.bytes, b' ');

        self.bytes.extend_from_slice(data);
        pad(&mut self.bytes, 0);
        self.hdus += 1;
    }
}

fn pad(bytes: &mut Vec<u8>, fill: u8) {
    let target = bytes.len().next_multiple_of(BLOCK_LEN as usize);
    bytes.resize(target, fill);
    debug_assert_eq!(bytes.len() as u64 % BLOCK_LEN, 0);
}

fn format_card(keyword: &str, value: &CardValue) -> String {
    let value = match value {
        CardValue::Logical(v) => format!("{:>20}", if *v { "T" } else { "F" }),
        CardValue::Integer(v) => format!("{v:>20}"),
        CardValue::Real(v) => format!("{:>20}", format!("{v:E}")),
        CardValue::Text(v) => format!("'{:<8}'", v.replace('\'', "''")),
    };
    let mut card = format!("{keyword:<8}= {value}");
    card.truncate(CARD_LEN);
    format!("{card:<width$}", width = CARD_LEN)
}
