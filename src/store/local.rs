//! On-device health store: samples kept in memory and, when opened from a
//! path, mirrored to a JSON file.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{HealthStore, Statistics, StatisticsQuery, StoreError};
use crate::{
    storage::{load_json, save_json, StorageError},
    structs::quantity_sample::{QuantitySample, QuantityType, QuantityTypeId},
};

/// How the store answers permission requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorizationPolicy {
    #[default]
    Grant,
    Deny,
}

#[derive(Default)]
struct LocalState {
    shareable: HashSet<QuantityTypeId>,
    readable: HashSet<QuantityTypeId>,
    samples: Vec<QuantitySample>,
}

pub struct LocalHealthStore {
    supported: HashSet<QuantityTypeId>,
    policy: AuthorizationPolicy,
    path: Option<PathBuf>,
    state: Mutex<LocalState>,
}

impl LocalHealthStore {
    pub fn in_memory() -> Self {
        Self {
            supported: HashSet::from([QuantityTypeId::DietaryWater]),
            policy: AuthorizationPolicy::default(),
            path: None,
            state: Mutex::default(),
        }
    }

    /// Opens a store backed by `path`, loading any samples already saved there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let samples: Vec<QuantitySample> = load_json(&path)?.unwrap_or_default();
        info!("Loaded {} samples from {path:?}", samples.len());

        let store = Self {
            path: Some(path),
            ..Self::in_memory()
        };
        store.lock().samples = samples;

        Ok(store)
    }

    pub fn with_policy(mut self, policy: AuthorizationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_supported_types(mut self, ids: impl IntoIterator<Item = QuantityTypeId>) -> Self {
        self.supported = ids.into_iter().collect();
        self
    }

    /// Snapshot of every stored sample, oldest first.
    pub fn samples(&self) -> Vec<QuantitySample> {
        self.lock().samples.clone()
    }

    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_supported(&self, quantity_type: QuantityType) -> Result<(), StoreError> {
        if self.supported.contains(&quantity_type.id()) {
            Ok(())
        } else {
            Err(StoreError::UnsupportedType(quantity_type.id()))
        }
    }

    fn statistics(&self, query: &StatisticsQuery) -> Result<Option<Statistics>, StoreError> {
        let id = query.quantity_type.id();
        self.ensure_supported(query.quantity_type)?;

        let state = self.lock();
        if !state.readable.contains(&id) {
            return Err(StoreError::NotAuthorized(id));
        }

        let mut matching = state
            .samples
            .iter()
            .filter(|s| s.quantity_type == query.quantity_type && query.contains(s.start))
            .peekable();

        if matching.peek().is_none() {
            return Ok(None);
        }

        Ok(Some(Statistics {
            quantity_type: query.quantity_type,
            start: query.start,
            end: query.end,
            sum_quantity: Some(matching.map(|s| s.litres).sum()),
        }))
    }
}

impl Default for LocalHealthStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl HealthStore for LocalHealthStore {
    fn quantity_type(&self, id: QuantityTypeId) -> Option<QuantityType> {
        self.supported.contains(&id).then(|| QuantityType::new(id))
    }

    #[instrument(skip_all)]
    async fn request_authorization(
        &self,
        share: &[QuantityType],
        read: &[QuantityType],
    ) -> Result<(), StoreError> {
        for quantity_type in share.iter().chain(read) {
            self.ensure_supported(*quantity_type)?;
        }

        if self.policy == AuthorizationPolicy::Deny {
            return Err(StoreError::AuthorizationDenied(
                "access to health data was declined".to_string(),
            ));
        }

        let mut state = self.lock();
        state.shareable.extend(share.iter().map(QuantityType::id));
        state.readable.extend(read.iter().map(QuantityType::id));
        debug!("Granted share {share:?}, read {read:?}");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn save(&self, sample: QuantitySample) -> Result<(), StoreError> {
        let id = sample.quantity_type.id();
        self.ensure_supported(sample.quantity_type)?;

        if !sample.litres.is_finite() || sample.litres.is_sign_negative() {
            return Err(StoreError::InvalidQuantity(sample.litres));
        }

        let mut state = self.lock();
        if !state.shareable.contains(&id) {
            return Err(StoreError::NotAuthorized(id));
        }

        state.samples.push(sample);

        if let Some(path) = &self.path {
            if let Err(e) = save_json(path, &state.samples) {
                state.samples.pop();
                return Err(e.into());
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    fn execute(&self, query: StatisticsQuery) {
        let result = self.statistics(&query);
        query.complete(result);
    }
}
