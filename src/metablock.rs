//! 8 KiB-framed metadata streams
//!
//! All metadata tables are stored as runs of metablocks: a 16-bit
//! little-endian header whose top bit marks the payload as stored
//! uncompressed and whose low 15 bits give the payload size, followed
//! by the payload. [`MetablockIterator`] walks the framing and hands
//! out the decompressed payloads; [`MetablockReader`] layers the
//! generic cursor on top so callers can address the decompressed
//! stream without seeing block boundaries.

use std::sync::Arc;

use deku::DekuContainerRead;
use tracing::trace;

use crate::error::ForehandError;
use crate::extract::{ExtractBuffer, ExtractManager};
use crate::map::{MapManager, MapReader};
use crate::reader::{Reader, SpanIterator};

/// Maximum metablock payload size, compressed or not
pub const METABLOCK_SIZE: usize = 8192;

/// Size of the metablock header
const HEADER_SIZE: usize = 2;

const METABLOCK_UNCOMPRESSED: u16 = 1 << 15;

/// Check the stored-uncompressed bit within a raw header
pub(crate) fn is_compressed(header: u16) -> bool {
    header & METABLOCK_UNCOMPRESSED == 0
}

/// Payload length following a raw header
pub(crate) fn payload_len(header: u16) -> usize {
    (header & !METABLOCK_UNCOMPRESSED) as usize
}

enum MetablockView {
    None,
    /// Payload stored uncompressed, exposed straight from the map.
    Mapped,
    /// Payload decompressed through the extract manager.
    Extracted(Arc<ExtractBuffer>),
}

pub(crate) struct MetablockIterator<'a> {
    reader: MapReader<'a>,
    extract: Arc<ExtractManager>,
    /// Compressed payload size of the current metablock.
    outer_size: usize,
    view: MetablockView,
}

impl<'a> MetablockIterator<'a> {
    pub fn new(
        manager: &'a MapManager,
        extract: Arc<ExtractManager>,
        start_address: u64,
        upper_limit: u64,
    ) -> Self {
        Self {
            reader: MapReader::new(manager, start_address, upper_limit),
            extract,
            outer_size: 0,
            view: MetablockView::None,
        }
    }

    /// Read the next header, leaving the map reader on the payload.
    fn next_header(&mut self) -> Result<Option<u16>, ForehandError> {
        match self.reader.advance(self.outer_size, HEADER_SIZE) {
            Ok(()) => {}
            Err(ForehandError::OutOfBounds) => return Ok(None),
            Err(e) => return Err(e),
        }
        let data = self.reader.data();
        let header = u16::from_le_bytes([data[0], data[1]]);

        let outer_size = payload_len(header);
        if outer_size > METABLOCK_SIZE {
            return Err(ForehandError::MetablockTooBig);
        }
        if outer_size == 0 {
            return Err(ForehandError::SizeMismatch);
        }
        trace!(
            address = self.reader.address(),
            outer_size,
            compressed = is_compressed(header),
            "metablock header"
        );
        Ok(Some(header))
    }

    /// Advance `count` whole metablocks, decompressing none of them.
    pub fn skip(&mut self, count: usize) -> Result<(), ForehandError> {
        for _ in 0..count {
            let header = self.next_header()?.ok_or(ForehandError::OutOfBounds)?;
            // position an empty window at the payload start so the
            // following advance steps over it
            self.reader.advance(HEADER_SIZE, 0)?;
            self.outer_size = payload_len(header);
        }
        self.view = MetablockView::None;
        Ok(())
    }
}

impl SpanIterator for MetablockIterator<'_> {
    fn next_span(&mut self, _desired_size: usize) -> Result<bool, ForehandError> {
        self.view = MetablockView::None;

        let header = match self.next_header()? {
            Some(header) => header,
            None => return Ok(false),
        };
        let outer_size = payload_len(header);
        self.reader.advance(HEADER_SIZE, outer_size)?;
        self.outer_size = outer_size;

        if is_compressed(header) {
            let buffer = self.extract.uncompress(&self.reader)?;
            if buffer.data.len() > METABLOCK_SIZE {
                return Err(ForehandError::SizeMismatch);
            }
            self.view = MetablockView::Extracted(buffer);
        } else {
            self.view = MetablockView::Mapped;
        }
        Ok(true)
    }

    fn span(&self) -> &[u8] {
        match &self.view {
            MetablockView::None => &[],
            MetablockView::Mapped => self.reader.data(),
            MetablockView::Extracted(buffer) => &buffer.data,
        }
    }
}

/// Reader over the decompressed bytes of a metablock run.
pub(crate) struct MetablockReader<'a> {
    reader: Reader<MetablockIterator<'a>>,
}

impl<'a> MetablockReader<'a> {
    pub fn new(
        manager: &'a MapManager,
        extract: Arc<ExtractManager>,
        start_address: u64,
        upper_limit: u64,
    ) -> Self {
        Self {
            reader: Reader::new(MetablockIterator::new(
                manager,
                extract,
                start_address,
                upper_limit,
            )),
        }
    }

    pub fn advance(&mut self, offset: usize, size: usize) -> Result<(), ForehandError> {
        self.reader.advance(offset, size)
    }

    pub fn data(&self) -> &[u8] {
        self.reader.data()
    }

    /// Advance to `[offset, offset + size)` and parse a `T` from it.
    pub fn parse<T>(&mut self, offset: usize, size: usize) -> Result<T, ForehandError>
    where
        T: for<'de> DekuContainerRead<'de>,
    {
        self.advance(offset, size)?;
        let (_, value) = T::from_bytes((self.data(), 0))?;
        Ok(value)
    }
}
