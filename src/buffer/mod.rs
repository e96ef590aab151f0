//! Readonly page cache.
//!
//! Column segments live on fixed-size pages. The cache owns the resident
//! copies and hands out refcounted pin handles: while any handle to a page
//! is alive, the page bytes are stable at a fixed address. Pages are
//! immutable once inserted, so concurrent readers share frames freely.

pub mod page;

pub use page::*;

use crate::error::{Error, Result};
use byte_unit::Byte;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const DEFAULT_POOL_SIZE: Byte = Byte::from_u64(64 * 1024 * 1024);

/// Configuration of the readonly page cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageCacheConfig {
    /// Total memory budget of the cache. The frame count is derived
    /// by dividing the budget by the page size.
    pub pool_size: Byte,
}

impl PageCacheConfig {
    #[inline]
    pub fn pool_size<T>(mut self, pool_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.pool_size = Byte::from(pool_size);
        self
    }

    #[inline]
    pub fn build(self) -> ReadonlyPageCache {
        ReadonlyPageCache::with_capacity(self.pool_size.as_u64() as usize)
    }
}

impl Default for PageCacheConfig {
    #[inline]
    fn default() -> Self {
        PageCacheConfig {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// One resident page. Frames are shared between the cache mapping and any
/// outstanding handles, so eviction never invalidates a pinned page.
struct Frame {
    bytes: Box<[u8]>,
}

/// Readonly cache of fixed-size pages keyed by block id.
///
/// Capacity is enforced at insertion: once the frame budget is used up,
/// further insertions fail with a resource exhaustion error until pages
/// are evicted.
pub struct ReadonlyPageCache {
    mappings: DashMap<PageID, Arc<Frame>>,
    size: usize,
    allocated: AtomicUsize,
}

impl ReadonlyPageCache {
    /// Creates a cache with a memory budget in bytes.
    #[inline]
    pub fn with_capacity(pool_size: usize) -> Self {
        let size = pool_size / PAGE_SIZE;
        ReadonlyPageCache {
            mappings: DashMap::new(),
            size,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Returns total number of frame slots in this cache.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Returns number of currently mapped pages.
    #[inline]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// Copies the given bytes into a fresh page frame and maps it under
    /// the given block id. The page is immutable afterwards.
    #[inline]
    pub fn insert_page(&self, page_id: PageID, data: &[u8]) -> Result<()> {
        if data.len() > PAGE_SIZE {
            return Err(Error::SegmentTooLarge);
        }
        // reserve a frame slot under the budget before touching the mapping.
        let mut allocated = self.allocated.load(Ordering::Relaxed);
        loop {
            if allocated >= self.size {
                return Err(Error::InsufficientMemory(self.size * PAGE_SIZE));
            }
            match self.allocated.compare_exchange(
                allocated,
                allocated + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(v) => allocated = v,
            }
        }
        match self.mappings.entry(page_id) {
            Entry::Occupied(_) => {
                self.allocated.fetch_sub(1, Ordering::AcqRel);
                Err(Error::PageAlreadyCached)
            }
            Entry::Vacant(vac) => {
                let mut bytes = vec![0u8; PAGE_SIZE].into_boxed_slice();
                bytes[..data.len()].copy_from_slice(data);
                vac.insert(Arc::new(Frame { bytes }));
                Ok(())
            }
        }
    }

    /// Pins a page and returns a residency handle for it.
    #[inline]
    pub fn pin(&self, page_id: PageID) -> Result<PageHandle> {
        let frame = self
            .mappings
            .get(&page_id)
            .map(|f| Arc::clone(f.value()))
            .ok_or(Error::PageNotCached)?;
        Ok(PageHandle { frame })
    }

    /// Unmaps one page from the cache and returns whether it was mapped.
    /// Outstanding handles keep the frame bytes alive until dropped.
    #[inline]
    pub fn evict_page(&self, page_id: PageID) -> bool {
        if self.mappings.remove(&page_id).is_some() {
            self.allocated.fetch_sub(1, Ordering::AcqRel);
            return true;
        }
        false
    }
}

/// Scoped residency token over one page.
///
/// Cloning shares the pin. Dropping the last handle of an evicted page
/// releases the frame memory.
#[derive(Clone)]
pub struct PageHandle {
    frame: Arc<Frame>,
}

impl PageHandle {
    /// Returns the page bytes. Stable for the lifetime of the handle.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.frame.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_cache_insert_and_pin() {
        let cache = PageCacheConfig::default()
            .pool_size(4u64 * PAGE_SIZE as u64)
            .build();
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.allocated(), 0);

        cache.insert_page(1, &[1, 2, 3]).unwrap();
        assert_eq!(cache.allocated(), 1);
        let handle = cache.pin(1).unwrap();
        assert_eq!(&handle.bytes()[..3], &[1, 2, 3]);
        // rest of the page is zeroed.
        assert_eq!(handle.bytes().len(), PAGE_SIZE);
        assert!(handle.bytes()[3..].iter().all(|b| *b == 0));

        assert!(matches!(cache.pin(2), Err(Error::PageNotCached)));
        assert!(matches!(
            cache.insert_page(1, &[9]),
            Err(Error::PageAlreadyCached)
        ));
    }

    #[test]
    fn test_page_cache_capacity_exhaustion() {
        let cache = ReadonlyPageCache::with_capacity(2 * PAGE_SIZE);
        cache.insert_page(1, &[1]).unwrap();
        cache.insert_page(2, &[2]).unwrap();
        assert!(matches!(
            cache.insert_page(3, &[3]),
            Err(Error::InsufficientMemory(_))
        ));
        // eviction frees a slot.
        assert!(cache.evict_page(1));
        cache.insert_page(3, &[3]).unwrap();
        assert_eq!(cache.allocated(), 2);
    }

    #[test]
    fn test_page_cache_eviction_keeps_pinned_bytes() {
        let cache = ReadonlyPageCache::with_capacity(PAGE_SIZE);
        cache.insert_page(7, &[42; 16]).unwrap();
        let handle = cache.pin(7).unwrap();
        assert!(cache.evict_page(7));
        assert!(!cache.evict_page(7));
        // the pinned frame outlives its mapping.
        assert!(handle.bytes()[..16].iter().all(|b| *b == 42));
        assert!(matches!(cache.pin(7), Err(Error::PageNotCached)));
    }

    #[test]
    fn test_page_cache_rejects_oversized_page() {
        let cache = ReadonlyPageCache::with_capacity(PAGE_SIZE);
        let data = vec![0u8; PAGE_SIZE + 1];
        assert!(matches!(
            cache.insert_page(1, &data),
            Err(Error::SegmentTooLarge)
        ));
    }
}
