//! VMDK encoders: monolithic-sparse (C6) and stream-optimized (C7).

pub mod header;
pub mod overhead;
pub mod sparse;
pub mod stream;

pub use header::{SparseExtentHeader, GRAIN_SIZE_SECTORS, SECTOR_SIZE, VMDK_MAGIC};
pub use sparse::SparseVmdkWriter;
pub use stream::{compress_grain, decompress_grain, StreamVmdkWriter};
