use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::type_tags;

/// Shared handle to a stored data object.
pub type SharedDataset = Arc<dyn Any + Send + Sync>;

type_tags! {
    /// Kind of dataset held by the store. At most one key per type is active.
    pub struct DatasetType {
        SURFACE = 0 => "surface",
        ANNOTATION = 1 => "annotation",
        BEM = 2 => "bem",
        RAW = 3 => "raw",
        AVERAGE = 4 => "average",
        FORWARD_SOLUTION = 5 => "forward_solution",
        COVARIANCE = 6 => "covariance",
        SOURCE_ESTIMATE = 7 => "source_estimate",
    }
    custom_base = 1000;
}

/// One stored dataset.
#[derive(Clone)]
pub struct DatasetEntry {
    pub key: String,
    pub dataset_type: DatasetType,
    pub data: SharedDataset,
    pub inserted_at: DateTime<Utc>,
}

impl DatasetEntry {
    pub(crate) fn new(key: String, dataset_type: DatasetType, data: SharedDataset) -> Self {
        Self {
            key,
            dataset_type,
            data,
            inserted_at: Utc::now(),
        }
    }

    /// The data object as `T`, if it is one.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.data).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for DatasetEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetEntry")
            .field("key", &self.key)
            .field("dataset_type", &self.dataset_type)
            .field("inserted_at", &self.inserted_at)
            .finish_non_exhaustive()
    }
}

/// Payload of `ACTIVE_DATASET_CHANGED`.
///
/// `key` and `dataset` are `None` when the active entry of `dataset_type`
/// was cleared.
#[derive(Clone)]
pub struct ActiveDatasetChanged {
    pub dataset_type: DatasetType,
    pub key: Option<String>,
    pub dataset: Option<SharedDataset>,
}

impl ActiveDatasetChanged {
    pub fn is_cleared(&self) -> bool {
        self.key.is_none()
    }
}

impl std::fmt::Debug for ActiveDatasetChanged {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveDatasetChanged")
            .field("dataset_type", &self.dataset_type)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

/// Payload of `DATASET_ADDED` and `DATASET_REMOVED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetChange {
    pub key: String,
    pub dataset_type: DatasetType,
}

/// Data store errors.
#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    #[error("Dataset not found: {0}")]
    NotFound(String),

    #[error("Setting not found: {0}")]
    SettingNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
