//! Epoch-stamped image cache slots

use crate::pixel::PixelBuffer;

/// Snapshot of a cache slot's state, mostly for diagnostics and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Whether an image is currently cached
    pub valid: bool,
    /// Validity epoch, bumped by every invalidation
    pub epoch: u64,
    /// How many times an image has been computed into this slot
    pub recomputes: u64,
}

/// Lazily filled image cache.
///
/// Invalidation drops the image and bumps the epoch. Work started against an
/// older epoch (a background preview, for example) can compare epochs to find
/// out whether its result is still wanted.
#[derive(Debug, Clone, Default)]
pub struct CacheSlot {
    image: Option<PixelBuffer>,
    epoch: u64,
    recomputes: u64,
}

impl CacheSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached image, if valid
    pub fn get(&self) -> Option<&PixelBuffer> {
        self.image.as_ref()
    }

    /// Whether an image is cached
    pub fn is_valid(&self) -> bool {
        self.image.is_some()
    }

    /// Store a freshly computed image
    pub fn store(&mut self, image: PixelBuffer) {
        self.image = Some(image);
        self.recomputes += 1;
    }

    /// Store an image computed elsewhere if the slot has not been invalidated since `epoch`
    pub fn store_if_current(&mut self, epoch: u64, image: PixelBuffer) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.store(image);
        true
    }

    /// Drop the cached image
    pub fn invalidate(&mut self) {
        self.image = None;
        self.epoch += 1;
    }

    /// Current validity epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of images computed into this slot so far
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    /// State summary
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            valid: self.is_valid(),
            epoch: self.epoch,
            recomputes: self.recomputes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_lifecycle() {
        let mut slot = CacheSlot::new();
        assert!(!slot.is_valid());

        slot.store(PixelBuffer::try_new(1, 1).unwrap());
        assert!(slot.is_valid());
        assert_eq!(slot.recompute_count(), 1);

        let epoch = slot.epoch();
        slot.invalidate();
        assert!(!slot.is_valid());
        assert_eq!(slot.epoch(), epoch + 1);
    }

    #[test]
    fn test_store_if_current_rejects_stale() {
        let mut slot = CacheSlot::new();
        let epoch = slot.epoch();
        slot.invalidate();

        assert!(!slot.store_if_current(epoch, PixelBuffer::try_new(1, 1).unwrap()));
        assert!(!slot.is_valid());

        assert!(slot.store_if_current(slot.epoch(), PixelBuffer::try_new(1, 1).unwrap()));
        assert!(slot.is_valid());
    }
}
