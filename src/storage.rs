use crate::detection::{Attack, Detection, NewDetection};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Durable store for detection records.
///
/// Persistence is the durability boundary: a detection is broadcast only
/// after `create` has returned the stored record with its id.
#[async_trait]
pub trait DetectionStore: Send + Sync {
    async fn create(&self, detection: NewDetection) -> Result<Detection>;
}

/// Durable store for attack records.
#[async_trait]
pub trait AttackStore: Send + Sync {
    async fn create(&self, attack: Attack) -> Result<Attack>;
}

/// In-memory detection store assigning sequential ids.
#[derive(Default)]
pub struct MemoryDetectionStore {
    records: Arc<Mutex<Vec<Detection>>>,
}

impl MemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<Detection> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl DetectionStore for MemoryDetectionStore {
    async fn create(&self, detection: NewDetection) -> Result<Detection> {
        let mut records = self.records.lock().await;
        let stored = Detection {
            id: records.len() as u64 + 1,
            camera_id: detection.camera_id,
            timestamp: detection.timestamp,
            path: detection.path,
            objects: detection.objects,
        };
        records.push(stored.clone());
        Ok(stored)
    }
}

/// In-memory attack store assigning sequential ids.
#[derive(Default)]
pub struct MemoryAttackStore {
    records: Arc<Mutex<Vec<Attack>>>,
}

impl MemoryAttackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<Attack> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AttackStore for MemoryAttackStore {
    async fn create(&self, mut attack: Attack) -> Result<Attack> {
        let mut records = self.records.lock().await;
        attack.id = records.len() as u64 + 1;
        records.push(attack.clone());
        Ok(attack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_memory_detection_store_assigns_ids() {
        let store = MemoryDetectionStore::new();

        let detection = NewDetection {
            camera_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            path: String::new(),
            objects: vec![],
        };

        let first = store.create(detection.clone()).await.unwrap();
        let second = store.create(detection).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(store.records().await.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_attack_store_assigns_ids() {
        let store = MemoryAttackStore::new();

        let attack = Attack {
            id: 0,
            lat: 1.0,
            lng: 2.0,
            height: 3.0,
            function: "patrol".to_string(),
            acceleration: 0.0,
            velocity: 0.0,
            distance: 0.0,
            status: "idle".to_string(),
            created_at: Utc::now(),
        };

        let stored = store.create(attack).await.unwrap();
        assert_eq!(stored.id, 1);
    }
}
