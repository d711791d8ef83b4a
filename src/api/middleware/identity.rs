//! Caller identity resolution for rate limiting and personalized caching

use std::net::SocketAddr;

use axum::{body::Body, extract::ConnectInfo, http::Request};

use crate::api::state::IdentitySettings;
use crate::domain::ClientIdentity;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolves who is calling.
///
/// Order: an identity already attached by internal callers, the trusted user
/// header, the first `X-Forwarded-For` hop (when trusted), the socket peer.
pub fn resolve_identity(request: &Request<Body>, settings: &IdentitySettings) -> ClientIdentity {
    if let Some(identity) = request.extensions().get::<ClientIdentity>() {
        return identity.clone();
    }

    let header_value = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(user) = header_value(&settings.user_header) {
        return ClientIdentity::User(user.to_string());
    }

    if settings.trust_forwarded_for {
        let first_hop = header_value(FORWARDED_FOR)
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        if let Some(addr) = first_hop {
            return ClientIdentity::Ip(addr.to_string());
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| ClientIdentity::Ip(addr.ip().to_string()))
        .unwrap_or(ClientIdentity::Unknown)
}
