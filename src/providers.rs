use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

use crate::cancel::CancellationFlag;
use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::normalize::ZipCode;
use crate::stats::StatsHandle;

/// Normalized fields sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressQuery {
    pub address: String,
    pub city: String,
    pub state: String,
}

impl AddressQuery {
    pub fn one_line(&self) -> String {
        format!("{}, {}, {}", self.address, self.city, self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Found(ZipCode),
    NotFound,
    /// Transport failure or timeout, already logged by the provider.
    Error(String),
}

/// Fixed pauses a provider requires after an unsuccessful call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pacing {
    pub after_miss: Duration,
    pub after_error: Duration,
}

impl Pacing {
    pub fn from_millis(after_miss_ms: u64, after_error_ms: u64) -> Self {
        Self {
            after_miss: Duration::from_millis(after_miss_ms),
            after_error: Duration::from_millis(after_error_ms),
        }
    }

    fn delay_for(&self, outcome: &LookupOutcome) -> Duration {
        match outcome {
            LookupOutcome::Found(_) => Duration::ZERO,
            LookupOutcome::NotFound => self.after_miss,
            LookupOutcome::Error(_) => self.after_error,
        }
    }
}

#[async_trait]
pub trait ZipLookup: Send + Sync {
    fn name(&self) -> &'static str;

    fn pacing(&self) -> Pacing;

    async fn lookup(&self, query: &AddressQuery) -> LookupOutcome;
}

/// Providers tried strictly in order until one finds a postal code.
#[derive(Clone)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn ZipLookup>>,
    fallthrough_delay: Duration,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn ZipLookup>>, fallthrough_delay: Duration) -> Self {
        Self {
            providers,
            fallthrough_delay,
        }
    }

    /// Census first, then Nominatim, sharing one HTTP client.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let http = http_client(config)?;
        let census = CensusClient::new(http.clone(), config);
        let nominatim = NominatimClient::new(http, config);
        let providers: Vec<Arc<dyn ZipLookup>> = vec![Arc::new(census), Arc::new(nominatim)];
        Ok(Self::new(providers, config.fallthrough_delay()))
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn resolve(
        &self,
        query: &AddressQuery,
        cancel: &CancellationFlag,
        stats: &StatsHandle,
    ) -> Option<ZipCode> {
        for (idx, provider) in self.providers.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!(provider = provider.name(), "cancelled before provider call");
                return None;
            }

            stats.record_api_call();
            let outcome = provider.lookup(query).await;
            trace!(provider = provider.name(), ?outcome, "provider responded");
            if let LookupOutcome::Found(zip) = outcome {
                return Some(zip);
            }

            let delay = provider.pacing().delay_for(&outcome);
            if !delay.is_zero() {
                sleep(delay).await;
            }

            let has_next = idx + 1 < self.providers.len();
            if has_next && !cancel.is_cancelled() && !self.fallthrough_delay.is_zero() {
                sleep(self.fallthrough_delay).await;
            }
        }
        None
    }
}

pub struct CensusClient {
    http: Client,
    endpoint: String,
    benchmark: String,
    pacing: Pacing,
}

impl CensusClient {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            endpoint: config.census_endpoint.clone(),
            benchmark: config.census_benchmark.clone(),
            pacing: Pacing::from_millis(config.census_miss_delay_ms, config.census_error_delay_ms),
        }
    }
}

#[async_trait]
impl ZipLookup for CensusClient {
    fn name(&self) -> &'static str {
        "census"
    }

    fn pacing(&self) -> Pacing {
        self.pacing
    }

    async fn lookup(&self, query: &AddressQuery) -> LookupOutcome {
        #[derive(Deserialize)]
        struct Response {
            result: Option<ResponseResult>,
        }

        #[derive(Deserialize)]
        struct ResponseResult {
            #[serde(rename = "addressMatches")]
            address_matches: Option<Vec<AddressMatch>>,
        }

        #[derive(Deserialize)]
        struct AddressMatch {
            #[serde(rename = "addressComponents")]
            address_components: Option<AddressComponents>,
        }

        #[derive(Deserialize)]
        struct AddressComponents {
            zip: Option<String>,
        }

        let one_line = query.one_line();
        let request = self.http.get(&self.endpoint).query(&[
            ("address", one_line.as_str()),
            ("benchmark", self.benchmark.as_str()),
            ("format", "json"),
        ]);

        let body = match fetch_body(request, self.name()).await {
            Ok(Some(body)) => body,
            Ok(None) => return LookupOutcome::NotFound,
            Err(message) => return LookupOutcome::Error(message),
        };

        let parsed: Response = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(?err, provider = self.name(), "unexpected response shape");
                return LookupOutcome::NotFound;
            }
        };

        parsed
            .result
            .and_then(|result| result.address_matches)
            .and_then(|matches| matches.into_iter().next())
            .and_then(|first| first.address_components)
            .and_then(|components| components.zip)
            .and_then(|zip| ZipCode::parse(&zip.chars().take(5).collect::<String>()))
            .map(LookupOutcome::Found)
            .unwrap_or(LookupOutcome::NotFound)
    }
}

pub struct NominatimClient {
    http: Client,
    endpoint: String,
    pacing: Pacing,
}

impl NominatimClient {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            endpoint: config.nominatim_endpoint.clone(),
            pacing: Pacing::from_millis(
                config.nominatim_miss_delay_ms,
                config.nominatim_error_delay_ms,
            ),
        }
    }
}

#[async_trait]
impl ZipLookup for NominatimClient {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn pacing(&self) -> Pacing {
        self.pacing
    }

    async fn lookup(&self, query: &AddressQuery) -> LookupOutcome {
        #[derive(Deserialize)]
        struct Candidate {
            address: Option<CandidateAddress>,
        }

        #[derive(Deserialize)]
        struct CandidateAddress {
            postcode: Option<String>,
        }

        let free_text = format!("{}, United States", query.one_line());
        let request = self.http.get(&self.endpoint).query(&[
            ("q", free_text.as_str()),
            ("format", "json"),
            ("addressdetails", "1"),
            ("limit", "1"),
            ("countrycodes", "us"),
        ]);

        let body = match fetch_body(request, self.name()).await {
            Ok(Some(body)) => body,
            Ok(None) => return LookupOutcome::NotFound,
            Err(message) => return LookupOutcome::Error(message),
        };

        let candidates: Vec<Candidate> = match serde_json::from_str(&body) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(?err, provider = self.name(), "unexpected response shape");
                return LookupOutcome::NotFound;
            }
        };

        candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.address)
            .and_then(|address| address.postcode)
            .and_then(|postcode| ZipCode::parse(&postcode))
            .map(LookupOutcome::Found)
            .unwrap_or(LookupOutcome::NotFound)
    }
}

/// `Ok(None)` for a non-200 reply, `Err` for transport failures and timeouts.
async fn fetch_body(
    request: reqwest::RequestBuilder,
    provider: &'static str,
) -> Result<Option<String>, String> {
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            warn!(?err, provider, timeout = err.is_timeout(), "provider request failed");
            return Err(err.to_string());
        }
    };

    if response.status() != StatusCode::OK {
        debug!(provider, status = %response.status(), "provider returned non-success status");
        return Ok(None);
    }

    response.text().await.map(Some).map_err(|err| {
        warn!(?err, provider, "failed reading provider response body");
        err.to_string()
    })
}

/// Shared client for every provider: identifying user agent, per-request timeout.
pub(crate) fn http_client(config: &AppConfig) -> AppResult<Client> {
    let http = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.provider_timeout())
        .build()?;
    Ok(http)
}
