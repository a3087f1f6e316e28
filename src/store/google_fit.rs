//! Google Fit backed health store.
//!
//! Water intake maps to the `com.google.hydration` data type, whose single
//! `volume` field is already in liters. Samples are written to a raw data
//! source owned by this app; totals come from the `dataset:aggregate`
//! endpoint so Google does the summing.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{HealthStore, Statistics, StatisticsQuery, StoreError};
use crate::{
    oauth::{Credentials, OAuthClient, RedirectServer},
    storage::{load_json, save_json},
    structs::quantity_sample::{QuantitySample, QuantityType, QuantityTypeId},
};

pub const FIT_API_BASE: &str = "https://www.googleapis.com/fitness/v1/users/me";

const HYDRATION_DATA_TYPE: &str = "com.google.hydration";
const DATA_STREAM_NAME: &str = "HydrationSource";

#[derive(Clone)]
pub struct GoogleFitStore {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    api_base: Url,
    oauth: OAuthClient,
    redirect_port: u16,
    credentials_path: Option<PathBuf>,
    credentials: Mutex<Option<Credentials>>,
    authorized: AtomicBool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSource {
    data_stream_id: String,
    #[serde(default)]
    data_stream_name: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSourceList {
    #[serde(default)]
    data_source: Vec<DataSource>,
}

#[derive(Deserialize, Default)]
struct AggregateResponse {
    #[serde(default)]
    bucket: Vec<Bucket>,
}

#[derive(Deserialize, Default)]
struct Bucket {
    #[serde(default)]
    dataset: Vec<Dataset>,
}

#[derive(Deserialize, Default)]
struct Dataset {
    #[serde(default)]
    point: Vec<DataPoint>,
}

#[derive(Deserialize, Default)]
struct DataPoint {
    #[serde(default)]
    value: Vec<Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Value {
    fp_val: Option<f64>,
}

impl AggregateResponse {
    /// Sum of every hydration value, or `None` when Google returned no points.
    fn total_litres(&self) -> Option<f64> {
        let mut values = self
            .bucket
            .iter()
            .flat_map(|b| &b.dataset)
            .flat_map(|d| &d.point)
            .flat_map(|p| &p.value)
            .filter_map(|v| v.fp_val)
            .peekable();

        values.peek()?;
        Some(values.sum())
    }
}

/// Nanoseconds since the epoch, which only reach from 1677 to 2262.
fn to_nanos(instant: DateTime<Utc>) -> Result<i64, StoreError> {
    instant
        .timestamp_nanos_opt()
        .ok_or(StoreError::InvalidTimestamp(instant))
}

/// Where the store talks to and keeps its tokens.
#[derive(Debug, Clone)]
pub struct GoogleFitOptions {
    pub api_base: Url,

    /// Port for the OAuth redirect server, 0 picks any free port
    pub redirect_port: u16,

    /// Saved credentials are loaded from and written back to this file
    pub credentials_path: Option<PathBuf>,

    /// Takes precedence over anything saved at `credentials_path`
    pub credentials: Option<Credentials>,
}

impl GoogleFitOptions {
    pub fn new(api_base: Url) -> Self {
        Self {
            api_base,
            redirect_port: 0,
            credentials_path: None,
            credentials: None,
        }
    }
}

impl GoogleFitStore {
    pub fn new(
        http: reqwest::Client,
        oauth: OAuthClient,
        options: GoogleFitOptions,
    ) -> Result<Self, StoreError> {
        let credentials = match (options.credentials, &options.credentials_path) {
            (Some(credentials), _) => Some(credentials),
            (None, Some(path)) => load_json::<Credentials>(path)?,
            (None, None) => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                api_base: options.api_base,
                oauth,
                redirect_port: options.redirect_port,
                credentials_path: options.credentials_path,
                credentials: Mutex::new(credentials),
                authorized: AtomicBool::new(false),
            }),
        })
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.inner.credentials.lock().await.clone()
    }
}

impl Inner {
    fn endpoint(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| StoreError::Decode(format!("{} cannot be a base URL", self.api_base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, access_token: &str) -> RequestBuilder {
        self.http.request(method, url).bearer_auth(access_token)
    }

    fn ensure_supported(quantity_type: QuantityType) -> Result<(), StoreError> {
        match quantity_type.id() {
            QuantityTypeId::DietaryWater => Ok(()),
            #[allow(unreachable_patterns)]
            other => Err(StoreError::UnsupportedType(other)),
        }
    }

    fn ensure_authorized(&self, quantity_type: QuantityType) -> Result<(), StoreError> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotAuthorized(quantity_type.id()))
        }
    }

    fn persist(&self, credentials: &Credentials) -> Result<(), StoreError> {
        if let Some(path) = &self.credentials_path {
            save_json(path, credentials)?;
        }
        Ok(())
    }

    /// Returns a usable access token plus the data stream id, refreshing the
    /// token first when it has expired.
    async fn session(&self) -> Result<(String, String), StoreError> {
        let mut guard = self.credentials.lock().await;
        let credentials = guard
            .as_mut()
            .ok_or(StoreError::NotAuthorized(QuantityTypeId::DietaryWater))?;

        if credentials.is_expired() {
            self.refresh(credentials).await?;
        }

        let stream_id = credentials
            .data_stream_id
            .clone()
            .ok_or(StoreError::NotAuthorized(QuantityTypeId::DietaryWater))?;

        Ok((credentials.access_token.clone(), stream_id))
    }

    async fn refresh(&self, credentials: &mut Credentials) -> Result<(), StoreError> {
        debug!("Access token expired, refreshing");
        let grant = self
            .oauth
            .refresh_access_token(&credentials.refresh_token)
            .await?;

        credentials.access_token = grant.access_token;
        credentials.expires_at = grant.expires_at;
        if let Some(refresh_token) = grant.refresh_token {
            credentials.refresh_token = refresh_token;
        }

        self.persist(credentials)
    }

    #[instrument(skip_all)]
    async fn run_consent_flow(&self) -> Result<Credentials, StoreError> {
        let server = RedirectServer::bind(self.redirect_port)?;
        let redirect_uri = server.redirect_uri();
        let consent_url = self.oauth.consent_url(&redirect_uri);

        info!("Waiting for Google Fit consent");
        println!("Open this link to let hydrate-tracker use Google Fit:\n{consent_url}\n");

        let code = server.wait_for_code().await?;
        let grant = self
            .oauth
            .exchange_code_with_tokens(&code, &redirect_uri)
            .await?;

        let refresh_token = grant.refresh_token.ok_or_else(|| {
            StoreError::OAuth("Google did not issue a refresh token".to_string())
        })?;

        Ok(Credentials {
            access_token: grant.access_token,
            refresh_token,
            expires_at: grant.expires_at,
            data_stream_id: None,
        })
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Google Fit responded with {status}");
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    #[instrument(skip_all)]
    async fn create_fit_data_source(&self, access_token: &str) -> Result<String, StoreError> {
        let body = json!({
            "dataStreamName": DATA_STREAM_NAME,
            "type": "raw",
            "application": {
                "detailsUrl": "https://github.com/angeloanan/hydrate-reminder",
                "name": "Hydrate Tracker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "dataType": {
                "name": HYDRATION_DATA_TYPE,
                "field": [
                    {
                        "name": "volume",
                        "format": "floatPoint",
                        "optional": false
                    }
                ]
            }
        });

        let response = self
            .request(Method::POST, self.endpoint(&["dataSources"])?, access_token)
            .json(&body)
            .send()
            .await?;

        // Google refuses to create the same stream twice, look it up instead
        if response.status() == StatusCode::CONFLICT {
            return self.find_fit_data_source(access_token).await;
        }

        let source = Self::check(response)
            .await?
            .json::<DataSource>()
            .await
            .map_err(|e| StoreError::Decode(format!("data source: {e}")))?;

        info!("Created Fit data source {}", source.data_stream_id);
        Ok(source.data_stream_id)
    }

    async fn find_fit_data_source(&self, access_token: &str) -> Result<String, StoreError> {
        let mut url = self.endpoint(&["dataSources"])?;
        url.query_pairs_mut()
            .append_pair("dataTypeName", HYDRATION_DATA_TYPE);

        let list = Self::check(self.request(Method::GET, url, access_token).send().await?)
            .await?
            .json::<DataSourceList>()
            .await
            .map_err(|e| StoreError::Decode(format!("data source list: {e}")))?;

        list.data_source
            .into_iter()
            .find(|s| s.data_stream_name.as_deref() == Some(DATA_STREAM_NAME))
            .map(|s| s.data_stream_id)
            .ok_or_else(|| StoreError::Decode("hydration data source not found".to_string()))
    }

    #[instrument(skip(self))]
    async fn write_water_intake_data(&self, sample: QuantitySample) -> Result<(), StoreError> {
        let start = to_nanos(sample.start)?;
        let end = to_nanos(sample.end)?;
        let (access_token, data_stream_id) = self.session().await?;
        let url = self.endpoint(&[
            "dataSources",
            &data_stream_id,
            "datasets",
            &format!("{start}-{end}"),
        ])?;

        let body = json!({
            "dataSourceId": data_stream_id,
            "minStartTimeNs": start,
            "maxEndTimeNs": end,
            "point": [
                {
                    "dataTypeName": HYDRATION_DATA_TYPE,
                    "startTimeNanos": start,
                    "endTimeNanos": end,
                    "value": [
                        { "fpVal": sample.litres }
                    ]
                }
            ]
        });

        let response = self
            .request(Method::PATCH, url, &access_token)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn aggregate(
        &self,
        quantity_type: QuantityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Option<Statistics>, StoreError> {
        let (access_token, _) = self.session().await?;

        let duration_millis = (end - start).num_milliseconds();
        if duration_millis <= 0 {
            return Ok(None);
        }

        let body = json!({
            "aggregateBy": [{ "dataTypeName": HYDRATION_DATA_TYPE }],
            "bucketByTime": { "durationMillis": duration_millis },
            "startTimeMillis": start.timestamp_millis(),
            "endTimeMillis": end.timestamp_millis(),
        });

        let response = self
            .request(Method::POST, self.endpoint(&["dataset:aggregate"])?, &access_token)
            .json(&body)
            .send()
            .await?;

        let aggregate = Self::check(response)
            .await?
            .json::<AggregateResponse>()
            .await
            .map_err(|e| StoreError::Decode(format!("aggregate: {e}")))?;

        Ok(aggregate.total_litres().map(|sum| Statistics {
            quantity_type,
            start,
            end,
            sum_quantity: Some(sum),
        }))
    }
}

#[async_trait]
impl HealthStore for GoogleFitStore {
    fn quantity_type(&self, id: QuantityTypeId) -> Option<QuantityType> {
        let quantity_type = QuantityType::new(id);
        Inner::ensure_supported(quantity_type)
            .ok()
            .map(|()| quantity_type)
    }

    #[instrument(skip_all)]
    async fn request_authorization(
        &self,
        share: &[QuantityType],
        read: &[QuantityType],
    ) -> Result<(), StoreError> {
        for quantity_type in share.iter().chain(read) {
            Inner::ensure_supported(*quantity_type)?;
        }

        let inner = &self.inner;
        let mut guard = inner.credentials.lock().await;

        let mut credentials = match guard.clone() {
            Some(saved) if !saved.is_expired() => saved,
            Some(mut saved) => match inner.refresh(&mut saved).await {
                Ok(()) => saved,
                // Refresh token was revoked or expired, ask the user again
                Err(StoreError::Status {
                    status: 400 | 401, ..
                }) => {
                    warn!("Saved Google Fit grant is no longer valid");
                    inner.run_consent_flow().await?
                }
                Err(e) => return Err(e),
            },
            None => inner.run_consent_flow().await?,
        };

        // Keep the grant even if the data source can't be set up yet
        inner.persist(&credentials)?;
        *guard = Some(credentials.clone());

        if credentials.data_stream_id.is_none() {
            let stream_id = inner
                .create_fit_data_source(&credentials.access_token)
                .await?;
            credentials.data_stream_id = Some(stream_id);

            inner.persist(&credentials)?;
            *guard = Some(credentials);
        }

        inner.authorized.store(true, Ordering::SeqCst);

        Ok(())
    }

    async fn save(&self, sample: QuantitySample) -> Result<(), StoreError> {
        Inner::ensure_supported(sample.quantity_type)?;
        self.inner.ensure_authorized(sample.quantity_type)?;

        if !sample.litres.is_finite() || sample.litres.is_sign_negative() {
            return Err(StoreError::InvalidQuantity(sample.litres));
        }

        self.inner.write_water_intake_data(sample).await
    }

    fn execute(&self, query: StatisticsQuery) {
        let checked = Inner::ensure_supported(query.quantity_type)
            .and_then(|()| self.inner.ensure_authorized(query.quantity_type));
        if let Err(e) = checked {
            query.complete(Err(e));
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner
                .aggregate(query.quantity_type, query.start, query.end)
                .await;
            query.complete(result);
        });
    }
}
