use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, instrument};

use crate::{
    store::{HealthStore, Statistics, StatisticsQuery, StoreError},
    structs::quantity_sample::{QuantitySample, QuantityType, QuantityTypeId},
};

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Dietary water is not available in this health store")]
    UnsupportedDataType,

    #[error(transparent)]
    StoreOperationFailed(#[from] StoreError),

    #[error("The health store returned no total for this period")]
    NoAggregateResult,
}

/// Records and sums water intake against a [`HealthStore`].
#[derive(Clone)]
pub struct IntakeManager {
    store: Arc<dyn HealthStore>,
}

impl IntakeManager {
    pub fn new(store: Arc<dyn HealthStore>) -> Self {
        Self { store }
    }

    fn water_type(&self) -> Result<QuantityType, IntakeError> {
        self.store
            .quantity_type(QuantityTypeId::DietaryWater)
            .ok_or(IntakeError::UnsupportedDataType)
    }

    /// Asks for permission to both write and read dietary water.
    #[instrument(skip(self))]
    pub async fn request_authorization(&self) -> Result<(), IntakeError> {
        let water = self.water_type()?;
        self.store.request_authorization(&[water], &[water]).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn write_intake(&self, litres: f64, at: DateTime<Utc>) -> Result<(), IntakeError> {
        let water = self.water_type()?;
        self.store
            .save(QuantitySample::instant(water, litres, at))
            .await?;
        debug!("Saved {litres} L at {at}");
        Ok(())
    }

    /// Total liters recorded with a timestamp in `[start, end)`.
    ///
    /// A period the store has nothing to sum for is an error, not zero.
    #[instrument(skip(self))]
    pub async fn read_cumulative_intake(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, IntakeError> {
        let water = self.water_type()?;
        let (tx, rx) = oneshot::channel();

        self.store
            .execute(StatisticsQuery::new(water, start, end, move |result| {
                // The receiver only goes away if the caller stopped waiting
                let _ = tx.send(result);
            }));

        let result = rx.await.map_err(|_| StoreError::Cancelled)?;
        match result {
            Err(e) => Err(e.into()),
            Ok(None)
            | Ok(Some(Statistics {
                sum_quantity: None, ..
            })) => Err(IntakeError::NoAggregateResult),
            Ok(Some(Statistics {
                sum_quantity: Some(litres),
                ..
            })) => Ok(litres),
        }
    }
}
