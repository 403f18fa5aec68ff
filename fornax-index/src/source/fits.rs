use fornax_object_storage::{RangeReader, RemoteObjectRef};

use crate::{
    error::HeaderError,
    fits::{BLOCK_LEN, FitsHeader, HeaderScan, HeaderScanner, padded_len},
    index::Index,
    layout::{ArrayLayout, CoordinateAxis, DataType, Scaling},
    source::HeaderSource,
};

/// Indexes the uncompressed image HDUs of a FITS object from its in-band
/// headers.
///
/// The first `prefetch_bytes` of the object are read in one request. Headers
/// of later HDUs that fall outside that window are fetched with further
/// requests of the same size, so small files cost a single read. No single
/// header may be longer than `max_header_bytes`.
#[derive(Debug, Clone)]
pub struct FitsHeaderSource {
    prefetch_bytes: u64,
    max_hdus: usize,
    max_header_bytes: u64,
}

pub const DEFAULT_MAX_HEADER_BYTES: u64 = 1024 * 1024;

impl Default for FitsHeaderSource {
    fn default() -> Self {
        Self::new(64 * 1024, 32)
    }
}

impl FitsHeaderSource {
    pub fn new(prefetch_bytes: u64, max_hdus: usize) -> Self {
        Self {
            prefetch_bytes: prefetch_bytes.max(BLOCK_LEN),
            max_hdus: max_hdus.max(1),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES / BLOCK_LEN * BLOCK_LEN,
        }
    }

    /// Cap on the size of one header, rounded down to whole blocks (at least
    /// one).
    pub fn with_max_header_bytes(mut self, max_header_bytes: u64) -> Self {
        self.max_header_bytes = (max_header_bytes / BLOCK_LEN).max(1) * BLOCK_LEN;
        self
    }

    pub fn max_header_bytes(&self) -> u64 {
        self.max_header_bytes
    }

    pub fn from_config() -> Self {
        let config = &*fornax_config::CONFIG;
        Self::new(config.header_prefetch_bytes, config.max_hdus)
            .with_max_header_bytes(config.max_header_bytes)
    }
}

#[async_trait::async_trait]
impl HeaderSource for FitsHeaderSource {
    fn name(&self) -> &'static str {
        "fits"
    }

    async fn build_index(
        &self,
        reader: &dyn RangeReader,
        object: &RemoteObjectRef,
    ) -> Result<Index, HeaderError> {
        let location = object.location().to_string();
        let fits_error = |offset: u64, reason: String| HeaderError::Fits {
            location: location.clone(),
            offset,
            reason,
        };

        if object.size() < BLOCK_LEN {
            return Err(fits_error(0, "object is smaller than one FITS block".to_string()));
        }

        let mut window =
            HeaderWindow::new(reader, object, self.prefetch_bytes, self.max_header_bytes);
        let mut index = Index::new();
        let mut offset = 0u64;

        for hdu in 0..self.max_hdus {
            if offset.checked_add(BLOCK_LEN).is_none_or(|end| end > object.size()) {
                if offset < object.size() {
                    tracing::debug!(%location, offset, "ignoring trailing bytes after last HDU");
                }
                break;
            }

            let (header, header_len) = match window.header_at(offset).await? {
                Ok(found) => found,
                Err(reason) => return Err(fits_error(offset, reason)),
            };

            match (hdu, header.first_keyword()) {
                (0, "SIMPLE") | (1.., "XTENSION") => {}
                (0, other) => {
                    return Err(fits_error(
                        offset,
                        format!("not a FITS file, first keyword is {other:?}"),
                    ));
                }
                (_, other) => {
                    tracing::warn!(%location, offset, keyword = other, "stopping HDU walk at unexpected keyword");
                    break;
                }
            }

            let data_len = header
                .data_len()
                .map_err(|reason| fits_error(offset, reason))?;
            let overflow = || fits_error(offset, "data size overflows".to_string());
            let data_offset = offset.checked_add(header_len).ok_or_else(overflow)?;
            let next_offset = padded_len(data_len)
                .and_then(|padded| data_offset.checked_add(padded))
                .ok_or_else(overflow)?;

            match image_layout(&header, hdu, data_offset).map_err(|r| fits_error(offset, r))? {
                Some(layout) => {
                    let mut name = hdu_name(&header, hdu);
                    if index.array(&name).is_some() {
                        name = format!("HDU{hdu}");
                    }
                    tracing::debug!(%location, hdu, array = %name, shape = ?layout.shape, data_offset, "indexed image HDU");
                    index.insert(name, layout);
                }
                None => {
                    tracing::trace!(%location, hdu, xtension = ?header.text("XTENSION"), "skipping non-image HDU");
                }
            }

            offset = next_offset;
            if hdu + 1 == self.max_hdus && offset < object.size() {
                tracing::debug!(%location, max_hdus = self.max_hdus, "HDU limit reached, remaining HDUs not indexed");
            }
        }

        if index.is_empty() {
            return Err(HeaderError::NoArrays { location });
        }
        index.validate(object.size())?;
        tracing::debug!(%location, reads = window.reads, arrays = index.arrays.len(), "built FITS index");
        Ok(index)
    }
}

/// Sliding view over the header region of an object.
struct HeaderWindow<'a> {
    reader: &'a dyn RangeReader,
    object: &'a RemoteObjectRef,
    chunk: u64,
    max_header: u64,
    start: u64,
    bytes: Vec<u8>,
    reads: usize,
}

impl<'a> HeaderWindow<'a> {
    fn new(
        reader: &'a dyn RangeReader,
        object: &'a RemoteObjectRef,
        chunk: u64,
        max_header: u64,
    ) -> Self {
        Self {
            reader,
            object,
            chunk,
            max_header,
            start: 0,
            bytes: Vec::new(),
            reads: 0,
        }
    }

    fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }

    /// Find the complete header starting at `offset`. The outer result
    /// carries read failures, the inner one malformed headers.
    async fn header_at(
        &mut self,
        offset: u64,
    ) -> Result<Result<(FitsHeader, u64), String>, HeaderError> {
        if offset < self.start || offset >= self.end() {
            self.bytes = self.read(offset, self.chunk).await?;
            self.start = offset;
        }

        let mut scanner = HeaderScanner::new();
        loop {
            let scanned = scanner.scanned_len();
            let relative = (offset + scanned - self.start) as usize;
            let available = &self.bytes[relative..];
            let allowed = (self.max_header - scanned) as usize;
            match scanner.feed(&available[..available.len().min(allowed)]) {
                Ok(HeaderScan::Complete { header, len }) => return Ok(Ok((header, len))),
                Err(reason) => return Ok(Err(reason)),
                Ok(HeaderScan::Incomplete) => {
                    if scanner.scanned_len() >= self.max_header {
                        return Ok(Err(format!(
                            "no END card within the first {} header bytes",
                            self.max_header
                        )));
                    }
                    if self.end() >= self.object.size() {
                        return Ok(Err("END card not found before the end of the object".to_string()));
                    }
                    let wanted = self.chunk.min(offset.saturating_add(self.max_header) - self.end());
                    let more = self.read(self.end(), wanted).await?;
                    self.bytes.extend_from_slice(&more);
                }
            }
        }
    }

    async fn read(&mut self, offset: u64, len: u64) -> Result<Vec<u8>, HeaderError> {
        let end = offset.saturating_add(len).min(self.object.size());
        self.reads += 1;
        let bytes = self
            .reader
            .read_range(self.object.location(), offset..end)
            .await
            .map_err(|source| HeaderError::Read {
                location: self.object.location().to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}

fn hdu_name(header: &FitsHeader, hdu: usize) -> String {
    match header.text("EXTNAME").map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if hdu == 0 => "PRIMARY".to_string(),
        _ => format!("HDU{hdu}"),
    }
}

fn image_layout(
    header: &FitsHeader,
    hdu: usize,
    data_offset: u64,
) -> Result<Option<ArrayLayout>, String> {
    let is_image = if hdu == 0 {
        header.logical("GROUPS") != Some(true)
    } else {
        header.text("XTENSION").map(str::trim) == Some("IMAGE")
    };
    if !is_image {
        return Ok(None);
    }

    let naxes = header.axes()?;
    if naxes.is_empty() || naxes.contains(&0) {
        return Ok(None);
    }
    let bitpix = header.bitpix()?;
    let data_type =
        DataType::from_bitpix(bitpix).ok_or_else(|| format!("invalid BITPIX {bitpix}"))?;

    // FITS lists the fastest varying axis first.
    let shape: Vec<u64> = naxes.iter().rev().copied().collect();
    let mut layout = ArrayLayout::contiguous(data_type, shape, data_offset);

    let mut axes: Vec<Option<CoordinateAxis>> = (1..=naxes.len())
        .rev()
        .map(|fits_axis| linear_axis(header, fits_axis))
        .collect();
    if axes.iter().all(Option::is_none) {
        axes.clear();
    }
    layout = layout.with_axes(axes);

    let scale = header.real("BSCALE").unwrap_or(1.0);
    let zero = header.real("BZERO").unwrap_or(0.0);
    if scale != 1.0 || zero != 0.0 {
        layout = layout.with_scaling(Scaling { scale, zero });
    }

    Ok(Some(layout))
}

/// Linear world coordinate of a FITS axis (1-based), if it has one.
///
/// Projected celestial axes (`RA---TAN` and friends) are not linear and are
/// left without a mapping.
fn linear_axis(header: &FitsHeader, fits_axis: usize) -> Option<CoordinateAxis> {
    let ctype = header.text(&format!("CTYPE{fits_axis}")).map(str::trim);
    if ctype.is_some_and(|c| c.contains('-')) {
        return None;
    }
    let crval = header.real(&format!("CRVAL{fits_axis}"))?;
    let cdelt = header.real(&format!("CDELT{fits_axis}"))?;
    let crpix = header.real(&format!("CRPIX{fits_axis}")).unwrap_or(1.0);
    if cdelt == 0.0 || !cdelt.is_finite() || !crval.is_finite() || !crpix.is_finite() {
        return None;
    }

    let name = match ctype {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => format!("AXIS{fits_axis}"),
    };
    // Array pixel p is FITS pixel p + 1.
    Some(CoordinateAxis {
        name,
        start: crval + (1.0 - crpix) * cdelt,
        step: cdelt,
    })
}

#[cfg(test)]
mod tests {
    use fornax_object_storage::testing::CountingReader;

    use super::*;
    use crate::{fits::CardValue, fits::writer::FitsBuilder, layout::Storage};

    fn be_f32(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
        values.into_iter().flat_map(f32::to_be_bytes).collect()
    }

    #[tokio::test]
    async fn indexes_image_extensions_and_skips_tables() {
        let science = be_f32((0..12).map(|v| v as f32));
        let bytes = FitsBuilder::new()
            .empty_primary()
            .image(
                Some("SCI"),
                -32,
                &[4, 3],
                &[
                    ("CTYPE1", CardValue::Text("RA---TAN".to_string())),
                    ("CRVAL1", CardValue::Real(150.1)),
                    ("CDELT1", CardValue::Real(-0.0001)),
                    ("CTYPE2", CardValue::Text("TIME".to_string())),
                    ("CRVAL2", CardValue::Real(100.0)),
                    ("CDELT2", CardValue::Real(0.5)),
                    ("CRPIX2", CardValue::Real(2.0)),
                ],
                &science,
            )
            .table("EVENTS", 16, 10)
            .image(Some("ERR"), 16, &[2, 2], &[("BZERO", CardValue::Integer(32768))], &[0; 8])
            .finish();

        let reader = CountingReader::new();
        let object = reader.put("galex/cube.fits", bytes).await;

        let index = FitsHeaderSource::default()
            .build_index(&reader, &object)
            .await
            .unwrap();
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["SCI", "ERR"]);

        let sci = index.array("SCI").unwrap();
        assert_eq!(sci.shape, vec![3, 4]);
        assert_eq!(sci.data_type, DataType::F32);
        assert_eq!(sci.storage, Storage::Contiguous { offset: 2 * BLOCK_LEN });
        assert!(sci.axis(1).is_none(), "projected axis has no linear mapping");
        let time = sci.axis(0).unwrap();
        assert_eq!(time.name, "TIME");
        assert_eq!(time.world(0.0), 99.5);
        assert_eq!(time.world(1.0), 100.0);

        let err = index.array("ERR").unwrap();
        assert_eq!(err.scaling, Some(Scaling { scale: 1.0, zero: 32768.0 }));
        assert_eq!(err.data_type, DataType::I16);

        // Everything fits in the prefetch window.
        assert_eq!(reader.read_count(), 1);
    }

    #[tokio::test]
    async fn follows_headers_beyond_the_prefetch_window() {
        let big = vec![0u8; 4 * BLOCK_LEN as usize];
        let bytes = FitsBuilder::new()
            .image(None, 8, &[BLOCK_LEN, 4], &[], &big)
            .image(Some("MASK"), 8, &[10], &[], &[1; 10])
            .finish();

        let reader = CountingReader::new();
        let object = reader.put("ps1/skycell.fits", bytes).await;

        let index = FitsHeaderSource::new(BLOCK_LEN, 8)
            .build_index(&reader, &object)
            .await
            .unwrap();
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["PRIMARY", "MASK"]);
        assert_eq!(
            index.array("MASK").unwrap().storage,
            Storage::Contiguous { offset: 6 * BLOCK_LEN }
        );
        assert_eq!(
            reader.reads(),
            vec![0..BLOCK_LEN, 5 * BLOCK_LEN..6 * BLOCK_LEN]
        );
    }

    #[tokio::test]
    async fn max_hdus_limits_the_walk() {
        let bytes = FitsBuilder::new()
            .image(None, 8, &[4], &[], &[0; 4])
            .image(Some("SECOND"), 8, &[4], &[], &[0; 4])
            .finish();
        let reader = CountingReader::new();
        let object = reader.put("two.fits", bytes).await;

        let index = FitsHeaderSource::new(BLOCK_LEN, 1)
            .build_index(&reader, &object)
            .await
            .unwrap();
        assert_eq!(index.names().collect::<Vec<_>>(), vec!["PRIMARY"]);
    }

    #[tokio::test]
    async fn rejects_non_fits_and_header_only_files() {
        let reader = CountingReader::new();
        let not_fits = reader.put("notes.txt", vec![b'x'; BLOCK_LEN as usize]).await;
        assert!(matches!(
            FitsHeaderSource::default().build_index(&reader, &not_fits).await,
            Err(HeaderError::Fits { .. })
        ));

        let header_only = reader
            .put("empty.fits", FitsBuilder::new().empty_primary().finish())
            .await;
        assert!(matches!(
            FitsHeaderSource::default().build_index(&reader, &header_only).await,
            Err(HeaderError::NoArrays { .. })
        ));

        let tiny = reader.put("tiny.fits", vec![b' '; 10]).await;
        assert!(FitsHeaderSource::default().build_index(&reader, &tiny).await.is_err());
    }

    fn simple_card() -> Vec<u8> {
        format!("{:<80}", "SIMPLE  =                    T").into_bytes()
    }

    /// Header blocks for raw cards, without any checks on their content.
    fn raw_header(cards: &[&str]) -> Vec<u8> {
        let mut bytes: Vec<u8> = cards
            .iter()
            .chain(&["END"])
            .flat_map(|card| format!("{card:<80}").into_bytes())
            .collect();
        bytes.resize(bytes.len().next_multiple_of(BLOCK_LEN as usize), b' ');
        bytes
    }

    #[tokio::test]
    async fn data_size_overflow_is_malformed() {
        let mut bytes = FitsBuilder::new().image(None, 8, &[4], &[], &[0; 4]).finish();
        bytes.extend(raw_header(&[
            "XTENSION= 'BINTABLE'",
            "BITPIX  =                    8",
            "NAXIS   =                    2",
            "NAXIS1  =  9223372036854775807",
            "NAXIS2  =                    2",
            "PCOUNT  =                    0",
            "GCOUNT  =                    1",
        ]));
        let reader = CountingReader::new();
        let object = reader.put("hostile.fits", bytes).await;

        let err = FitsHeaderSource::default()
            .build_index(&reader, &object)
            .await
            .unwrap_err();
        match &err {
            HeaderError::Fits { offset, reason, .. } => {
                assert_eq!(*offset, 2 * BLOCK_LEN);
                assert!(reason.contains("overflows"), "{reason}");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn header_search_stops_at_the_size_cap() {
        let mut bytes = vec![b' '; 4 * 1024 * 1024];
        bytes[..80].copy_from_slice(&simple_card());
        let reader = CountingReader::new();
        let object = reader.put("spaces.fits", bytes).await;

        let source = FitsHeaderSource::new(64 * 1024, 32).with_max_header_bytes(256 * 1024);
        assert_eq!(source.max_header_bytes(), 91 * BLOCK_LEN);
        let err = source.build_index(&reader, &object).await.unwrap_err();
        assert!(err.to_string().contains("no END card within"), "{err}");

        let bytes_read: u64 = reader.reads().iter().map(|r| r.end - r.start).sum();
        assert_eq!(bytes_read, source.max_header_bytes());
        assert_eq!(reader.read_count(), 4);
    }

    #[tokio::test]
    async fn unterminated_header_is_malformed() {
        let mut bytes = vec![b' '; 2 * BLOCK_LEN as usize];
        bytes[..80].copy_from_slice(&simple_card());
        let reader = CountingReader::new();
        let object = reader.put("broken.fits", bytes).await;
        let err = FitsHeaderSource::new(BLOCK_LEN, 4)
            .build_index(&reader, &object)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("END card"), "{err}");
    }
}
