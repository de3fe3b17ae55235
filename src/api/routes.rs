use crate::api::api_error::APIError;
use crate::api::model::{ImportRequest, IssueRequest, ListResponse, PublicIpResponse};
use crate::api::server::AppState;
use crate::certs::pem::CertificateInfo;
use crate::control::{
    DnsConfigChanges, DnsRecordChanges, ExpiryStatus, NewDnsConfig, NewDnsRecord, NewProxy,
    ProxyChanges, ProxyResponse,
};
use crate::model::{Certificate, ConfigStatus, DnsConfig, DnsRecord, ProxyRoute, UpdateResult};
use crate::nginx::CommandOutcome;
use crate::scheduler::JobInfo;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

type APIResult<T> = Result<Json<T>, APIError>;

pub(super) fn new(state: AppState) -> Router {
    let api = Router::new()
        .route("/proxies", get(list_proxies).post(create_proxy))
        .route(
            "/proxies/:id",
            get(get_proxy).put(update_proxy).delete(delete_proxy),
        )
        .route("/proxies/:id/certificate", get(proxy_certificate))
        .route("/proxies/:id/regenerate", post(regenerate_proxy))
        .route(
            "/certificates",
            get(list_certificates).post(issue_certificate),
        )
        .route("/certificates/import", post(import_certificate))
        .route(
            "/certificates/:id",
            get(get_certificate).delete(delete_certificate),
        )
        .route("/certificates/:id/renew", post(renew_certificate))
        .route("/certificates/:id/info", get(certificate_info))
        .route("/certificates/:id/expiry", get(certificate_expiry))
        .route("/certificates/:id/proxies", get(certificate_proxies))
        .route("/dns/configs", get(list_dns_configs).post(create_dns_config))
        .route(
            "/dns/configs/:id",
            get(get_dns_config)
                .put(update_dns_config)
                .delete(delete_dns_config),
        )
        .route("/dns/configs/:id/records", get(list_dns_records))
        .route("/dns/records", post(create_dns_record))
        .route(
            "/dns/records/:id",
            get(get_dns_record)
                .put(update_dns_record)
                .delete(delete_dns_record),
        )
        .route("/dns/records/:id/update", post(update_record_now))
        .route("/dns/update-all", post(update_all_records))
        .route("/dns/status", get(dns_status))
        .route("/dns/public-ip", get(public_ip))
        .route("/dns/jobs", get(scheduled_jobs))
        .route("/dns/jobs/:id/pause", post(pause_job))
        .route("/dns/jobs/:id/resume", post(resume_job))
        .route("/nginx/validate", post(validate_nginx))
        .route("/nginx/reload", post(reload_nginx));

    Router::new()
        .route("/healthcheck", get(health_check))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

// Proxy routes.

async fn list_proxies(State(state): State<AppState>) -> APIResult<ListResponse<ProxyRoute>> {
    Ok(Json(state.control.list_proxies().await?.into()))
}

async fn create_proxy(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    WithRejection(Json(payload), _): WithRejection<Json<NewProxy>, APIError>,
) -> Result<(StatusCode, Json<ProxyResponse>), APIError> {
    tracing::info!(
        "proxy for {} requested by {}",
        payload.domain,
        client_addr.ip()
    );
    let response = state.control.create_proxy(payload).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_proxy(State(state): State<AppState>, Path(id): Path<u64>) -> APIResult<ProxyRoute> {
    Ok(Json(state.control.get_proxy(id).await?))
}

async fn update_proxy(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    WithRejection(Json(payload), _): WithRejection<Json<ProxyChanges>, APIError>,
) -> APIResult<ProxyResponse> {
    Ok(Json(state.control.update_proxy(id, payload).await?))
}

async fn delete_proxy(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<ProxyRoute> {
    Ok(Json(state.control.delete_proxy(id).await?))
}

async fn proxy_certificate(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<Certificate> {
    Ok(Json(state.control.proxy_certificate(id).await?))
}

async fn regenerate_proxy(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<ProxyRoute> {
    Ok(Json(state.control.regenerate_proxy(id).await?))
}

// Certificates.

async fn list_certificates(
    State(state): State<AppState>,
) -> APIResult<ListResponse<Certificate>> {
    Ok(Json(state.control.list_certificates().await?.into()))
}

async fn issue_certificate(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<IssueRequest>, APIError>,
) -> Result<(StatusCode, Json<Certificate>), APIError> {
    let cert = state.control.issue_certificate(&payload.domain).await?;
    Ok((StatusCode::CREATED, Json(cert)))
}

async fn import_certificate(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<ImportRequest>, APIError>,
) -> Result<(StatusCode, Json<Certificate>), APIError> {
    let cert = state
        .control
        .import_certificate(&payload.domain, &payload.cert_path, &payload.key_path)
        .await?;
    Ok((StatusCode::CREATED, Json(cert)))
}

async fn get_certificate(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<Certificate> {
    Ok(Json(state.control.get_certificate(id).await?))
}

async fn delete_certificate(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<Certificate> {
    Ok(Json(state.control.delete_certificate(id).await?))
}

async fn renew_certificate(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<Certificate> {
    Ok(Json(state.control.renew_certificate(id).await?))
}

async fn certificate_info(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<CertificateInfo> {
    Ok(Json(state.control.certificate_info(id).await?))
}

async fn certificate_expiry(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<ExpiryStatus> {
    Ok(Json(state.control.certificate_expiry(id).await?))
}

async fn certificate_proxies(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<ListResponse<ProxyRoute>> {
    Ok(Json(state.control.certificate_proxies(id).await?.into()))
}

// Dynamic DNS.

async fn list_dns_configs(State(state): State<AppState>) -> APIResult<ListResponse<DnsConfig>> {
    Ok(Json(state.control.list_dns_configs().await?.into()))
}

async fn create_dns_config(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<NewDnsConfig>, APIError>,
) -> Result<(StatusCode, Json<DnsConfig>), APIError> {
    let config = state.control.create_dns_config(payload).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn get_dns_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<DnsConfig> {
    Ok(Json(state.control.get_dns_config(id).await?))
}

async fn update_dns_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    WithRejection(Json(payload), _): WithRejection<Json<DnsConfigChanges>, APIError>,
) -> APIResult<DnsConfig> {
    Ok(Json(state.control.update_dns_config(id, payload).await?))
}

async fn delete_dns_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<DnsConfig> {
    Ok(Json(state.control.delete_dns_config(id).await?))
}

async fn list_dns_records(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<ListResponse<DnsRecord>> {
    Ok(Json(state.control.list_dns_records(id).await?.into()))
}

async fn create_dns_record(
    State(state): State<AppState>,
    WithRejection(Json(payload), _): WithRejection<Json<NewDnsRecord>, APIError>,
) -> Result<(StatusCode, Json<DnsRecord>), APIError> {
    let record = state.control.create_dns_record(payload).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_dns_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<DnsRecord> {
    Ok(Json(state.control.get_dns_record(id).await?))
}

async fn update_dns_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    WithRejection(Json(payload), _): WithRejection<Json<DnsRecordChanges>, APIError>,
) -> APIResult<DnsRecord> {
    Ok(Json(state.control.update_dns_record(id, payload).await?))
}

async fn delete_dns_record(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<DnsRecord> {
    Ok(Json(state.control.delete_dns_record(id).await?))
}

async fn update_record_now(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> APIResult<UpdateResult> {
    Ok(Json(state.control.update_record_now(id).await?))
}

async fn update_all_records(
    State(state): State<AppState>,
) -> APIResult<ListResponse<UpdateResult>> {
    Ok(Json(state.control.update_all_records().await?.into()))
}

async fn dns_status(State(state): State<AppState>) -> APIResult<ListResponse<ConfigStatus>> {
    Ok(Json(state.control.dns_status().await?.into()))
}

async fn public_ip(State(state): State<AppState>) -> APIResult<PublicIpResponse> {
    let ip = state.control.public_ip().await?;
    Ok(Json(PublicIpResponse { ip }))
}

async fn scheduled_jobs(State(state): State<AppState>) -> Json<ListResponse<JobInfo>> {
    Json(state.control.scheduled_jobs().await.into())
}

async fn pause_job(State(state): State<AppState>, Path(id): Path<u64>) -> APIResult<JobInfo> {
    Ok(Json(state.control.pause_job(id).await?))
}

async fn resume_job(State(state): State<AppState>, Path(id): Path<u64>) -> APIResult<JobInfo> {
    Ok(Json(state.control.resume_job(id).await?))
}

// nginx.

fn outcome(action: &str, outcome: CommandOutcome) -> Value {
    match outcome {
        CommandOutcome::Applied => json!({"message": format!("nginx {action} succeeded")}),
        CommandOutcome::Skipped(reason) => {
            json!({"message": format!("nginx {action} skipped"), "skipped": reason})
        }
    }
}

async fn validate_nginx(State(state): State<AppState>) -> APIResult<Value> {
    Ok(Json(outcome(
        "configuration test",
        state.control.validate_nginx().await?,
    )))
}

async fn reload_nginx(State(state): State<AppState>) -> APIResult<Value> {
    Ok(Json(outcome("reload", state.control.reload_nginx().await?)))
}
