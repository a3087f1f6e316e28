//! The health store seam.
//!
//! Everything this app records lives in an external health store. The trait
//! mirrors the three capabilities such stores offer: permission negotiation,
//! durable writes of quantity samples, and range-filtered statistics queries.
//! Statistics are delivered through a completion handler, the way platform
//! health APIs report query results.

pub mod google_fit;
pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    storage::StorageError,
    structs::quantity_sample::{QuantitySample, QuantityType, QuantityTypeId},
};

pub use {google_fit::GoogleFitStore, local::LocalHealthStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} is not available in this health store")]
    UnsupportedType(QuantityTypeId),

    #[error("Not authorized to access {0}")]
    NotAuthorized(QuantityTypeId),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(f64),

    #[error("Timestamp {0} is outside the range the health store accepts")]
    InvalidTimestamp(DateTime<Utc>),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Health store responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("OAuth flow failed: {0}")]
    OAuth(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Query was dropped before it completed")]
    Cancelled,
}

/// Result of a statistics query. `sum_quantity` is in liters and is `None`
/// when the store has nothing to aggregate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistics {
    pub quantity_type: QuantityType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub sum_quantity: Option<f64>,
}

pub type QueryResult = Result<Option<Statistics>, StoreError>;

type CompletionHandler = Box<dyn FnOnce(QueryResult) + Send + 'static>;

/// Cumulative-sum query over samples whose start lies in `[start, end)`.
pub struct StatisticsQuery {
    pub quantity_type: QuantityType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    handler: CompletionHandler,
}

impl StatisticsQuery {
    pub fn new<F>(
        quantity_type: QuantityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        handler: F,
    ) -> Self
    where
        F: FnOnce(QueryResult) + Send + 'static,
    {
        Self {
            quantity_type,
            start,
            end,
            handler: Box::new(handler),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Consumes the query so its handler can only ever run once.
    pub fn complete(self, result: QueryResult) {
        (self.handler)(result)
    }
}

impl std::fmt::Debug for StatisticsQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsQuery")
            .field("quantity_type", &self.quantity_type)
            .field("start", &self.start)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HealthStore: Send + Sync {
    /// Returns the quantity type if this store exposes it.
    fn quantity_type(&self, id: QuantityTypeId) -> Option<QuantityType>;

    async fn request_authorization(
        &self,
        share: &[QuantityType],
        read: &[QuantityType],
    ) -> Result<(), StoreError>;

    async fn save(&self, sample: QuantitySample) -> Result<(), StoreError>;

    /// Starts the query. Its handler is called exactly once, possibly before
    /// this returns.
    fn execute(&self, query: StatisticsQuery);
}
