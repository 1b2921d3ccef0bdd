mod cache;
mod cancel;
mod config;
mod engine;
mod errors;
mod normalize;
mod providers;
mod registry;
mod session;
mod stats;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cache::{CacheEntry, GeocodeCache};
pub use cancel::CancellationFlag;
pub use config::{AppConfig, PublicAppConfig};
pub use engine::GeocodeEngine;
pub use errors::{AppError, AppResult};
pub use normalize::{
    is_valid_zip, normalize_address, normalize_city, normalize_state, CacheKey, ZipCode,
};
pub use providers::{
    AddressQuery, CensusClient, LookupOutcome, NominatimClient, Pacing, ProviderChain, ZipLookup,
};
pub use registry::SessionRegistry;
pub use session::{BatchSession, ColumnRoles};
pub use stats::{LogEntry, LogKind, SessionState, StatsHandle, StatusSnapshot};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,zip_geocoder=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}
