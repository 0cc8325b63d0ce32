use tokio::sync::RwLock;
use tracing::trace;

/// Most recent video frame captured from the stream source.
#[derive(Debug, Clone)]
struct CachedFrame {
    bytes: Vec<u8>,
    timestamp: f64,
}

/// Single-slot cache holding the latest video frame.
///
/// Every inbound frame overwrites the slot unconditionally; there is no
/// history. Readers always get their own copy of the bytes so a concurrent
/// update can never be observed mid-write.
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: RwLock<Option<CachedFrame>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// Replace the cached frame with a newer one.
    pub async fn update(&self, bytes: Vec<u8>, timestamp: f64) {
        trace!("Caching frame ({} bytes, ts {})", bytes.len(), timestamp);
        let mut slot = self.slot.write().await;
        *slot = Some(CachedFrame { bytes, timestamp });
    }

    /// Get a copy of the latest frame, or `None` if no frame has arrived yet.
    pub async fn latest(&self) -> Option<(Vec<u8>, f64)> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .map(|frame| (frame.bytes.clone(), frame.timestamp))
    }

    /// Whether a frame is currently available.
    pub async fn is_populated(&self) -> bool {
        self.slot.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_cache_reports_not_available() {
        let cache = FrameCache::new();
        assert!(cache.latest().await.is_none());
        assert!(!cache.is_populated().await);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = FrameCache::new();
        cache.update(vec![1, 2, 3], 1.0).await;
        cache.update(vec![4, 5, 6], 2.0).await;

        let (bytes, timestamp) = cache.latest().await.unwrap();
        assert_eq!(bytes, vec![4, 5, 6]);
        assert_eq!(timestamp, 2.0);
    }

    #[tokio::test]
    async fn test_latest_returns_defensive_copy() {
        let cache = FrameCache::new();
        cache.update(vec![7, 8, 9], 3.0).await;

        let (mut bytes, _) = cache.latest().await.unwrap();
        bytes[0] = 0;

        let (again, _) = cache.latest().await.unwrap();
        assert_eq!(again, vec![7, 8, 9]);
    }
}
