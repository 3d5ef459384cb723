//! Data Fragment support

use deku::prelude::*;

use crate::data::DataSize;

/// Record naming one shared tail block
#[derive(Copy, Clone, Debug, PartialEq, Eq, DekuRead)]
#[deku(endian = "little")]
pub struct Fragment {
    /// Archive address of the stored fragment block.
    pub(crate) start: u64,
    size: u32,
    unused: u32,
}

impl Fragment {
    pub(crate) const SIZE: usize = 16;

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn size_info(&self) -> DataSize {
        DataSize::new(self.size)
    }
}
