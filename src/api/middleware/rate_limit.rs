//! Per-client rate limiting for collaborator endpoints.

use axum::http::Request;
use governor::clock::QuantaInstant;
use governor::middleware::NoOpMiddleware;
use std::net::IpAddr;
use std::sync::Arc;
use tower_governor::{
    GovernorError, GovernorLayer,
    governor::GovernorConfigBuilder,
    key_extractor::{KeyExtractor, PeerIpKeyExtractor, SmartIpKeyExtractor},
};

/// Keys requests by client IP.
///
/// Uses the socket peer address unless the service runs behind a trusted
/// reverse proxy, in which case `X-Forwarded-For` / `X-Real-IP` / `Forwarded`
/// are honoured first. Forwarded headers are spoofable, so they are only read
/// when `BEHIND_PROXY=true`.
#[derive(Debug, Clone, Copy)]
pub struct ClientIpKeyExtractor {
    behind_proxy: bool,
}

impl ClientIpKeyExtractor {
    pub fn new(behind_proxy: bool) -> Self {
        Self { behind_proxy }
    }
}

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        if self.behind_proxy {
            SmartIpKeyExtractor.extract(req)
        } else {
            PeerIpKeyExtractor.extract(req)
        }
    }
}

pub type RateLimitLayer =
    GovernorLayer<ClientIpKeyExtractor, NoOpMiddleware<QuantaInstant>, axum::body::Body>;

fn build(per_second: u64, burst_size: u32, behind_proxy: bool) -> anyhow::Result<RateLimitLayer> {
    let config = GovernorConfigBuilder::default()
        .per_second(per_second)
        .burst_size(burst_size)
        .key_extractor(ClientIpKeyExtractor::new(behind_proxy))
        .finish()
        .ok_or_else(|| anyhow::anyhow!("invalid rate limit configuration"))?;

    Ok(GovernorLayer::new(Arc::new(config)))
}

/// Rate limiter for the collaborator API.
///
/// # Limits
///
/// - **Rate**: 20 requests per second
/// - **Burst**: 200 requests
///
/// Link events arrive in bursts when links are imported in bulk, hence the
/// large burst. Requests over the limit receive `429 Too Many Requests`.
///
/// # Errors
///
/// Fails only if the limits above are zero.
pub fn api_layer(behind_proxy: bool) -> anyhow::Result<RateLimitLayer> {
    build(20, 200, behind_proxy)
}
