// HTTP surface — warp routes mapped 1:1 onto PoolService operations
//
// All policy lives in relaypool-core; this layer only extracts tokens,
// decodes JSON bodies, and maps PoolError variants to status codes.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use relaypool_core::{
    extract_token, LeaseApproval, PoolError, PoolService, ProviderRegistration,
};
use serde::Deserialize;
use serde_json::json;
use warp::http::{HeaderMap, StatusCode};
use warp::Filter;

#[derive(Debug, Deserialize)]
struct NextClaimRequest {
    #[serde(default)]
    provider_id: String,
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    let map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    extract_token(&map)
}

fn error_reply(err: &PoolError) -> (StatusCode, String) {
    match err {
        PoolError::PaymentRequired => (StatusCode::PAYMENT_REQUIRED, "payment_required".into()),
        PoolError::PaymentInactive => (StatusCode::FORBIDDEN, "payment_inactive".into()),
        PoolError::Validation(field) => (StatusCode::BAD_REQUEST, format!("invalid_{field}")),
        PoolError::SsrfRejected => (
            StatusCode::BAD_REQUEST,
            "endpoint_must_be_public_routable".into(),
        ),
        PoolError::SignatureInvalid => (StatusCode::FORBIDDEN, "lease_signature_invalid".into()),
        PoolError::LeaseExpired => (StatusCode::FORBIDDEN, "lease_expired".into()),
        PoolError::TokenMismatch => (StatusCode::FORBIDDEN, "token_mismatch".into()),
        PoolError::NoProvidersAvailable => {
            (StatusCode::SERVICE_UNAVAILABLE, "no_providers_available".into())
        }
    }
}

fn json_error(err: &PoolError) -> warp::reply::WithStatus<warp::reply::Json> {
    let (status, error) = error_reply(err);
    warp::reply::with_status(
        warp::reply::json(&json!({ "ok": false, "error": error })),
        status,
    )
}

fn ok_json<T: serde::Serialize>(body: &T) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(body), StatusCode::OK)
}

fn with_service(
    service: Arc<PoolService>,
) -> impl Filter<Extract = (Arc<PoolService>,), Error = Infallible> + Clone {
    warp::any().map(move || service.clone())
}

fn now_unix_ms() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

async fn handle_index() -> Result<impl warp::Reply, Infallible> {
    Ok(ok_json(&json!({
        "ok": true,
        "service": "relaypool",
        "endpoints": [
            "GET /health",
            "GET /providers",
            "POST /providers/register",
            "POST /providers/approve",
            "POST /claim/next",
            "POST /provision",
            "POST /prune",
            "GET /portal",
        ],
    })))
}

async fn handle_health() -> Result<impl warp::Reply, Infallible> {
    Ok(ok_json(&json!({ "ok": true, "ts": now_unix_ms() })))
}

async fn handle_providers(
    service: Arc<PoolService>,
    headers: HeaderMap,
) -> Result<impl warp::Reply, Infallible> {
    let token = header_token(&headers);
    match service.list_providers(token.as_deref()) {
        Ok(providers) => Ok(ok_json(&providers)),
        Err(err) => Ok(json_error(&err)),
    }
}

async fn handle_register(
    service: Arc<PoolService>,
    headers: HeaderMap,
    registration: ProviderRegistration,
) -> Result<impl warp::Reply, Infallible> {
    let token = header_token(&headers);
    match service.register_provider(token.as_deref(), registration) {
        Ok(provider) => Ok(ok_json(&json!({
            "ok": true,
            "registered": true,
            "node_id": provider.id,
        }))),
        Err(err) => Ok(json_error(&err)),
    }
}

async fn handle_approve(
    service: Arc<PoolService>,
    headers: HeaderMap,
    approval: LeaseApproval,
) -> Result<impl warp::Reply, Infallible> {
    let token = header_token(&headers);
    match service.approve(token.as_deref(), &approval) {
        Ok(_) => Ok(ok_json(&json!({ "ok": true, "approved": true }))),
        Err(err) => Ok(json_error(&err)),
    }
}

async fn handle_next_claim(
    service: Arc<PoolService>,
    headers: HeaderMap,
    request: NextClaimRequest,
) -> Result<impl warp::Reply, Infallible> {
    let token = header_token(&headers);
    match service.next_claim(token.as_deref(), &request.provider_id) {
        Ok(Some(claim)) => Ok(ok_json(&json!({ "ok": true, "claim": claim }))),
        Ok(None) => Ok(ok_json(&json!({ "ok": false }))),
        Err(err) => Ok(json_error(&err)),
    }
}

async fn handle_provision(
    service: Arc<PoolService>,
    headers: HeaderMap,
) -> Result<impl warp::Reply, Infallible> {
    let token = header_token(&headers);
    match service.provision(token.as_deref()) {
        Ok(provider) => Ok(ok_json(&json!({
            "id": provider.id,
            "endpoint": provider.endpoint,
            "public_key": provider.public_key,
            "allowed_ips": provider.allowed_ips,
        }))),
        Err(err) => Ok(json_error(&err)),
    }
}

async fn handle_prune(service: Arc<PoolService>) -> Result<impl warp::Reply, Infallible> {
    let removed = service.prune_providers();
    Ok(ok_json(&json!({ "ok": true, "removed": removed })))
}

const PORTAL_HTML: &str = "<!doctype html><html><body>\
<h1>Relaypool Payment Portal</h1>\
<p>Checkout flow placeholder.</p>\
</body></html>";

/// Serve the pool API until the process is stopped.
pub async fn run(service: Arc<PoolService>, port: u16) {
    let index = warp::get()
        .and(warp::path::end())
        .and_then(handle_index);

    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .and_then(handle_health);

    let providers = warp::get()
        .and(warp::path("providers"))
        .and(warp::path::end())
        .and(with_service(service.clone()))
        .and(warp::header::headers_cloned())
        .and_then(|service, headers| handle_providers(service, headers));

    let register = warp::post()
        .and(warp::path!("providers" / "register"))
        .and(with_service(service.clone()))
        .and(warp::header::headers_cloned())
        .and(warp::body::json())
        .and_then(handle_register);

    let approve = warp::post()
        .and(warp::path!("providers" / "approve"))
        .and(with_service(service.clone()))
        .and(warp::header::headers_cloned())
        .and(warp::body::json())
        .and_then(handle_approve);

    let next_claim = warp::post()
        .and(warp::path!("claim" / "next"))
        .and(with_service(service.clone()))
        .and(warp::header::headers_cloned())
        .and(warp::body::json())
        .and_then(handle_next_claim);

    let provision = warp::post()
        .and(warp::path("provision"))
        .and(warp::path::end())
        .and(with_service(service.clone()))
        .and(warp::header::headers_cloned())
        .and_then(|service, headers| handle_provision(service, headers));

    let prune = warp::post()
        .and(warp::path("prune"))
        .and(warp::path::end())
        .and(with_service(service.clone()))
        .and_then(handle_prune);

    let portal = warp::get()
        .and(warp::path("portal"))
        .and(warp::path::end())
        .map(|| warp::reply::html(PORTAL_HTML));

    let routes = index
        .or(health)
        .or(providers)
        .or(register)
        .or(approve)
        .or(next_claim)
        .or(provision)
        .or(prune)
        .or(portal)
        .with(warp::trace::request());

    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
}
