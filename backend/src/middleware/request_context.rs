use axum::{
    extract::{ConnectInfo, Request},
    http::{header::USER_AGENT, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::{future::Future, net::SocketAddr};

use crate::models::actor::ActorProfile;

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

tokio::task_local! {
    static CURRENT_REQUEST: RequestContext;
}

/// Per-request provenance made available to the audit layer without being
/// threaded through every call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub principal: Option<ActorProfile>,
    pub forwarded_for: Option<String>,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_headers(headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            principal: None,
            forwarded_for: header_value(headers, FORWARDED_FOR_HEADER),
            remote_addr: remote_addr.map(|addr| addr.ip().to_string()),
            user_agent: header_value(headers, USER_AGENT.as_str()),
        }
    }

    pub fn with_principal(mut self, principal: Option<ActorProfile>) -> Self {
        self.principal = principal;
        self
    }

    /// First hop of the forwarded-for chain, else the peer address.
    pub fn client_ip(&self) -> Option<String> {
        self.forwarded_for
            .as_deref()
            .and_then(|chain| chain.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .or_else(|| self.remote_addr.clone())
    }

    /// Runs `fut` with this context installed as the current request.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_REQUEST.scope(self, fut).await
    }

    /// Snapshot of the current request context; `None` outside a request.
    pub fn current() -> Option<RequestContext> {
        CURRENT_REQUEST.try_with(RequestContext::clone).ok()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Installs a [`RequestContext`] for the remainder of the request.
///
/// The principal comes from an [`ActorProfile`] extension set by the
/// authentication layer; the peer address from `ConnectInfo` when the server
/// was started with connect info.
pub async fn request_context(request: Request, next: Next) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let principal = request.extensions().get::<ActorProfile>().cloned();
    let context = RequestContext::from_headers(request.headers(), remote_addr).with_principal(principal);

    context.scope(next.run(request)).await
}
