use std::time::Duration;
use std::{env, io};

use serde::Serialize;
use tracing::debug;

const DEFAULT_CENSUS_ENDPOINT: &str =
    "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress";
const DEFAULT_CENSUS_BENCHMARK: &str = "Public_AR_Current";
const DEFAULT_NOMINATIM_ENDPOINT: &str = "https://nominatim.openstreetmap.org/search";
const DEFAULT_USER_AGENT: &str = concat!("zip-geocoder/", env!("CARGO_PKG_VERSION"));
const DEFAULT_RESULTS_LOG_CAPACITY: usize = 10_000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub census_endpoint: String,
    pub census_benchmark: String,
    pub nominatim_endpoint: String,
    pub user_agent: String,
    pub provider_timeout_ms: u64,
    pub census_miss_delay_ms: u64,
    pub census_error_delay_ms: u64,
    pub nominatim_miss_delay_ms: u64,
    pub nominatim_error_delay_ms: u64,
    pub fallthrough_delay_ms: u64,
    pub results_log_capacity: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub census_endpoint: String,
    pub census_benchmark: String,
    pub nominatim_endpoint: String,
    pub provider_timeout_ms: u64,
    pub fallthrough_delay_ms: u64,
    pub results_log_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            census_endpoint: parse_string("CENSUS_GEOCODER_ENDPOINT", DEFAULT_CENSUS_ENDPOINT),
            census_benchmark: parse_string("CENSUS_BENCHMARK", DEFAULT_CENSUS_BENCHMARK),
            nominatim_endpoint: parse_string("NOMINATIM_ENDPOINT", DEFAULT_NOMINATIM_ENDPOINT),
            user_agent: parse_string("GEOCODER_USER_AGENT", DEFAULT_USER_AGENT),
            provider_timeout_ms: parse_u64("PROVIDER_TIMEOUT_MS", 20_000).max(1),
            census_miss_delay_ms: parse_u64("CENSUS_MISS_DELAY_MS", 250),
            census_error_delay_ms: parse_u64("CENSUS_ERROR_DELAY_MS", 1_000),
            nominatim_miss_delay_ms: parse_u64("NOMINATIM_MISS_DELAY_MS", 1_500),
            nominatim_error_delay_ms: parse_u64("NOMINATIM_ERROR_DELAY_MS", 2_000),
            fallthrough_delay_ms: parse_u64("PROVIDER_FALLTHROUGH_DELAY_MS", 500),
            results_log_capacity: parse_usize(
                "RESULTS_LOG_CAPACITY",
                DEFAULT_RESULTS_LOG_CAPACITY,
            )
            .max(1),
        }
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn fallthrough_delay(&self) -> Duration {
        Duration::from_millis(self.fallthrough_delay_ms)
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            census_endpoint: self.census_endpoint.clone(),
            census_benchmark: self.census_benchmark.clone(),
            nominatim_endpoint: self.nominatim_endpoint.clone(),
            provider_timeout_ms: self.provider_timeout_ms,
            fallthrough_delay_ms: self.fallthrough_delay_ms,
            results_log_capacity: self.results_log_capacity,
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_overrides_and_clamps_log_capacity() {
        env::set_var("NOMINATIM_ENDPOINT", "http://localhost:9/search");
        env::set_var("CENSUS_MISS_DELAY_MS", "0");
        env::set_var("PROVIDER_TIMEOUT_MS", "not-a-number");
        env::set_var("RESULTS_LOG_CAPACITY", "0");

        let config = AppConfig::from_env();
        let public = config.public_profile();

        assert_eq!(public.nominatim_endpoint, "http://localhost:9/search");
        assert_eq!(public.census_benchmark, DEFAULT_CENSUS_BENCHMARK);
        assert_eq!(config.census_miss_delay_ms, 0);
        assert_eq!(config.provider_timeout(), Duration::from_secs(20));
        assert_eq!(public.results_log_capacity, 1);
    }
}
