pub mod buffer;
pub mod compression;
pub mod error;
pub mod segment;

pub mod prelude {
    pub use crate::buffer::{PageCacheConfig, PageHandle, ReadonlyPageCache};
    pub use crate::compression::chimp::{ChimpScanState, chimp_compress};
    pub use crate::error::*;
    pub use crate::segment::ColumnSegment;
}
