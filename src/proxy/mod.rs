pub mod auth;
pub mod engine;
pub mod rate_limit;
pub mod resolver;
pub mod server;
pub mod session;
pub mod sniffer;
pub mod templates;

use std::collections::HashMap;

use crate::config::EnvConfig;
use crate::db::BlockStore;
use crate::proxy::rate_limit::RateLimiter;
use crate::proxy::session::Session;
use crate::proxy::templates::Templates;

pub use server::serve;

/// The upstream filebrowser server the proxy fronts, plus the credential
/// map used to verify client-side hashes. Immutable for the lifetime of the
/// proxy process.
pub struct Destination {
    pub url: String,
    /// username -> plaintext password, used only to verify the hashed
    /// authorization header and rewrite it for the upstream.
    pub auth_map: HashMap<String, String>,
}

/// Everything a request handler needs, threaded through axum state.
pub struct ProxyState {
    pub env: EnvConfig,
    pub destination: Destination,
    pub session: Session,
    pub store: BlockStore,
    pub limiter: RateLimiter,
    pub templates: Templates,
    pub http_client: reqwest::Client,
}
