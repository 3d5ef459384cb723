//! Generic peek/advance cursor over span iterators
//!
//! Every metadata table, directory listing, and file body in the crate
//! is consumed through [`Reader`]. It exposes a window `[offset,
//! offset + size)` relative to the previous window start, borrowing
//! straight from the underlying iterator when the range fits inside
//! one span and stitching spans through an internal buffer when it
//! does not. Callers never see the boundary.

use crate::error::ForehandError;

/// Source of contiguous byte runs for a [`Reader`].
///
/// `span()` returns the current run, empty before the first
/// `next_span`. `next_span` moves to the following run and returns
/// `false` at the end of the stream.
pub(crate) trait SpanIterator {
    fn next_span(&mut self, desired_size: usize) -> Result<bool, ForehandError>;
    fn span(&self) -> &[u8];
}

#[derive(Debug, Clone, Copy)]
enum Window {
    /// Nothing exposed yet.
    Empty,
    /// Window borrows from the iterator's current span.
    Mapped { offset: usize, size: usize },
    /// Window borrows from the scratch buffer, starting at 0.
    Buffered { size: usize },
}

pub(crate) struct Reader<I: SpanIterator> {
    iterator: I,
    buffer: Vec<u8>,
    window: Window,
    /// Offset of the window into the iterator's current span
    /// (mapped mode bookkeeping, 0 while buffered).
    offset: usize,
    /// Start of the iterator's current span in buffer coordinates;
    /// 0 means the buffer is not in play.
    iterator_offset: usize,
}

impl<I: SpanIterator> Reader<I> {
    pub fn new(iterator: I) -> Self {
        Self {
            iterator,
            buffer: Vec::new(),
            window: Window::Empty,
            offset: 0,
            iterator_offset: 0,
        }
    }

    /// Move the window to `[offset, offset + size)`, both relative to
    /// the current window start. `offset` only moves forward.
    pub fn advance(&mut self, offset: usize, size: usize) -> Result<(), ForehandError> {
        if offset >= self.iterator_offset {
            let offset = offset - self.iterator_offset;
            self.iterator_offset = 0;
            self.handle_mapped(offset, size)
        } else {
            self.handle_buffered(offset, size)
        }
    }

    pub fn data(&self) -> &[u8] {
        match self.window {
            Window::Empty => &[],
            Window::Mapped { offset, size } => &self.iterator.span()[offset..offset + size],
            Window::Buffered { size } => &self.buffer[..size],
        }
    }

    fn next_span(&mut self, desired_size: usize) -> Result<(), ForehandError> {
        if self.iterator.next_span(desired_size)? {
            Ok(())
        } else {
            Err(ForehandError::OutOfBounds)
        }
    }

    /// The window start lies at or past the current span start.
    fn handle_mapped(&mut self, offset: usize, size: usize) -> Result<(), ForehandError> {
        let mut offset = offset
            .checked_add(self.offset)
            .ok_or(ForehandError::IntegerOverflow)?;

        // whole spans before the window start are skipped unseen
        let mut current = self.iterator.span().len();
        while current <= offset {
            offset -= current;
            self.next_span(size)?;
            current = self.iterator.span().len();
        }
        self.offset = offset;

        let end = offset.checked_add(size).ok_or(ForehandError::IntegerOverflow)?;
        if end <= self.iterator.span().len() {
            self.window = Window::Mapped { offset, size };
        } else {
            self.buffer.clear();
            self.fill_buffer(size)?;
        }
        Ok(())
    }

    /// The window start lies inside the already-buffered region.
    fn handle_buffered(&mut self, offset: usize, size: usize) -> Result<(), ForehandError> {
        // drop the duplicated span tail, then the consumed prefix
        self.buffer.truncate(self.iterator_offset);
        if offset != 0 {
            self.buffer.drain(..offset);
            self.iterator_offset -= offset;
        }
        self.fill_buffer(size)
    }

    /// Append spans until the buffer covers `size` bytes.
    fn fill_buffer(&mut self, size: usize) -> Result<(), ForehandError> {
        let mut offset = self.offset;
        loop {
            if self.buffer.len() >= size {
                break;
            }
            let span = self.iterator.span();
            let copy = (span.len() - offset).min(size - self.buffer.len());
            self.buffer.extend_from_slice(&span[offset..offset + copy]);
            offset = 0;
            if self.buffer.len() >= size {
                break;
            }
            self.next_span(size)?;
            self.iterator_offset = self.buffer.len();
        }
        self.offset = 0;
        self.window = Window::Buffered { size };
        Ok(())
    }
}
