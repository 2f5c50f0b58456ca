//! # qrctl: control plane for a multi-tenant QR code platform
//!
//! `qrctl` is the backend behind a QR code SaaS. It stores QR codes and their styling, records
//! scans through a public endpoint, enforces plan entitlements and a credit balance, takes
//! payments and subscription events from the billing gateway, and exposes a rate-limited,
//! metered developer API with signed outgoing webhooks.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum); all state lives in PostgreSQL.
//!
//! ### Request Flow
//!
//! #### Dashboard Requests (`/api/*`)
//!
//! Browser requests authenticate with the session cookie issued by `/auth/login` (or a trusted
//! proxy header). The [`CurrentUser`](api::models::users::CurrentUser) extractor re-reads the
//! user on every request, so plan changes, credit grants and account locks apply immediately.
//! Handlers check plan entitlements ([`entitlements`]) and debit credits ([`credits`]) inside the
//! same transaction as the write they guard.
//!
//! #### Developer Requests (`/api/v1/*`)
//!
//! API clients send `Authorization: Bearer sk_...`. Keys are stored hashed; the extractor checks
//! expiry and scopes, applies the per-key fixed-window rate limit ([`rate_limit`]) and records the
//! key in a request extension so the metering middleware ([`metering`]) can log usage once the
//! response is ready.
//!
//! #### Scans and Webhooks
//!
//! `POST /api/scan/{id}` is public. Each recorded scan can enqueue a `scan.created` event into the
//! webhook outbox; the [`WebhookDispatcher`](webhooks::WebhookDispatcher) claims due rows with
//! `FOR UPDATE SKIP LOCKED`, signs and sends them, and schedules retries.
//!
//! Gateway callbacks (`/webhooks/billing`, `/webhooks/payments`) are signature-checked and
//! deduplicated on the gateway's event id before any state changes.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use qrctl::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = qrctl::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     qrctl::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config).await?.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod credits;
mod crypto;
pub mod db;
mod domains;
mod email;
pub mod entitlements;
pub mod errors;
mod metering;
mod notifications;
mod openapi;
mod payment_providers;
mod rate_limit;
pub mod telemetry;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub mod test_utils;

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router, ServiceExt,
    extract::Request,
    http::{self, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use bon::Builder;
pub use config::Config;
use config::CorsOrigin;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower::Layer;
use tower_http::{
    cors::CorsLayer,
    normalize_path::NormalizePathLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument, warn};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    api::handlers::{
        admin, api_keys, auth as auth_handlers, billing as billing_handlers, custom_domains,
        notifications as notification_handlers, organizations, payments, qr_codes, scan, v1,
    },
    email::EmailService,
    openapi::{DashboardApiDoc, DeveloperApiDoc},
    payment_providers::PaymentProvider,
    webhooks::WebhookDispatcher,
};

/// Application state shared across all request handlers.
///
/// - `db`: PostgreSQL pool
/// - `config`: configuration loaded at startup
/// - `payment_provider`: configured payment gateway; payment routes answer 501 without one
/// - `email`: outgoing mail (receipts, dunning, invitations)
/// - `http_client`: shared client for outbound lookups such as DNS-over-HTTPS
/// - `metrics_handle`: Prometheus recorder handle, present when `enable_metrics` is set
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .http_client(reqwest::Client::new())
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub payment_provider: Option<Arc<dyn PaymentProvider>>,
    pub email: Option<Arc<EmailService>>,
    #[builder(default)]
    pub http_client: reqwest::Client,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// Get the qrctl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Connect to PostgreSQL and apply pending migrations
#[instrument(skip_all)]
async fn setup_database(config: &Config) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool.max_connections)
        .min_connections(config.pool.min_connections)
        .acquire_timeout(config.pool.acquire_timeout)
        .connect(&config.database_url)
        .await?;

    migrator().run(&pool).await?;
    info!("Database migrations applied");
    Ok(pool)
}

#[instrument(skip_all)]
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.auth.security.cors.allowed_origins {
        let header_value = match origin {
            CorsOrigin::Wildcard => "*".parse::<HeaderValue>()?,
            CorsOrigin::Url(url) => url.as_str().trim_end_matches('/').parse::<HeaderValue>()?,
        };
        origins.push(header_value);
    }

    let mut cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            http::Method::GET,
            http::Method::POST,
            http::Method::PUT,
            http::Method::PATCH,
            http::Method::DELETE,
        ])
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_credentials(config.auth.security.cors.allow_credentials)
        .expose_headers(vec![http::header::LOCATION, http::header::RETRY_AFTER]);

    if let Some(max_age) = config.auth.security.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Routes under `/api/v1`, metered per API key
fn developer_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/qr-codes", get(v1::list_qr_codes).post(v1::create_qr_code))
        .route(
            "/qr-codes/{id}",
            get(v1::get_qr_code).patch(v1::update_qr_code).delete(v1::delete_qr_code),
        )
        .route("/qr-codes/{id}/scans", get(v1::list_scans))
        .route("/usage", get(v1::get_usage))
        .route(
            "/webhooks/{qr_code_id}",
            get(v1::get_webhook).put(v1::configure_webhook).delete(v1::delete_webhook),
        )
        .route("/webhooks/{qr_code_id}/logs", get(v1::webhook_logs))
        .route("/plans", get(v1::list_plans))
        // route_layer so the middleware sees the matched route template
        .route_layer(from_fn_with_state(state.clone(), metering::record_api_usage))
}

/// Routes under `/api`
fn dashboard_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(auth_handlers::get_me))
        .route("/scan/{id}", post(scan::record_scan))
        // QR codes
        .route("/qr-codes", get(qr_codes::list_qr_codes).post(qr_codes::create_qr_code))
        .route(
            "/qr-codes/{id}",
            get(qr_codes::get_qr_code)
                .patch(qr_codes::update_qr_code)
                .delete(qr_codes::delete_qr_code),
        )
        .route("/qr-codes/{id}/analytics", get(qr_codes::get_analytics))
        // Billing, credits and payments
        .route("/billing/subscription", get(billing_handlers::get_subscription))
        .route("/billing/access", get(billing_handlers::get_access))
        .route("/billing/invoices", get(billing_handlers::list_invoices))
        .route("/user/credits", get(billing_handlers::get_credits))
        .route("/payments/create-order", post(payments::create_order))
        .route("/payments/verify", post(payments::verify_payment))
        .route("/payments/status", get(payments::payment_status))
        // API keys
        .route("/api-keys", get(api_keys::list_api_keys).post(api_keys::create_api_key))
        .route("/api-keys/{id}", axum::routing::delete(api_keys::revoke_api_key))
        .route("/api-keys/{id}/rotate", post(api_keys::rotate_api_key))
        .route("/api-keys/{id}/usage", get(api_keys::get_api_key_usage))
        // Organizations
        .route(
            "/organizations",
            get(organizations::list_organizations).post(organizations::create_organization),
        )
        .route(
            "/organizations/{id}",
            get(organizations::get_organization)
                .patch(organizations::update_organization)
                .delete(organizations::delete_organization),
        )
        .route(
            "/organizations/{id}/members",
            get(organizations::list_members).post(organizations::add_member),
        )
        .route(
            "/organizations/{id}/members/{user_id}",
            patch(organizations::update_member_role).delete(organizations::remove_member),
        )
        .route("/organizations/{id}/transfer-ownership", post(organizations::transfer_ownership))
        .route("/invitations/{token}/accept", post(organizations::accept_invitation))
        // Notifications
        .route("/notifications", get(notification_handlers::list_notifications))
        .route("/notifications/read-all", post(notification_handlers::mark_all_notifications_read))
        .route(
            "/notifications/{id}",
            patch(notification_handlers::mark_notification_read).delete(notification_handlers::delete_notification),
        )
        // Custom domains
        .route("/custom-domains", get(custom_domains::list_domains).post(custom_domains::manage_domain))
        // Administration
        .route("/admin/stats", get(admin::get_stats))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{id}", get(admin::get_user))
        .route("/admin/users/{id}/lock", post(admin::lock_user))
        .route("/admin/users/{id}/unlock", post(admin::unlock_user))
        .route("/admin/billing/adjust", post(admin::adjust_billing))
}

/// Build the main application router with all endpoints and middleware.
///
/// - `/auth/*`: registration, login, logout
/// - `/api/*`: dashboard API, plus `/api/v1/*` for API keys
/// - `/webhooks/*`: gateway callbacks
/// - `/docs`, `/docs/developer`: Scalar API references
/// - `/healthz`, and `/internal/metrics` when a Prometheus handle is present
///
/// Fails only if the CORS configuration holds an origin that is not a valid header value.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let auth_routes = Router::new()
        .route("/auth/register", post(auth_handlers::register))
        .route("/auth/login", post(auth_handlers::login))
        .route("/auth/logout", post(auth_handlers::logout));

    let api_routes = dashboard_routes().nest("/v1", developer_routes(&state));

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        // Gateway callbacks, authenticated by signature
        .route("/webhooks/billing", post(billing_handlers::billing_webhook))
        .route("/webhooks/payments", post(payments::payment_webhook))
        .merge(auth_routes)
        .nest("/api", api_routes)
        .with_state(state.clone())
        .route("/docs/openapi.json", get(|| async { Json(DashboardApiDoc::openapi()) }))
        .route("/docs/developer/openapi.json", get(|| async { Json(DeveloperApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", DashboardApiDoc::openapi()))
        .merge(Scalar::with_url("/docs/developer", DeveloperApiDoc::openapi()));

    if let Some(handle) = state.metrics_handle.clone() {
        router = router.route("/internal/metrics", get(move || async move { handle.render() }));
    }

    let router = router.layer(create_cors_layer(&state.config)?).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// Background tasks running alongside the HTTP server:
/// - webhook outbox dispatcher (when `webhooks.enabled`)
/// - rate-limit window sweeper (when `rate_limit.enabled`)
/// - pool gauges and Prometheus upkeep (when metrics are enabled)
///
/// Dropping the struct cancels the shutdown token through `drop_guard`.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<DropGuard>,
}

impl BackgroundServices {
    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for result in futures::future::join_all(self.background_tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task panicked during shutdown");
            }
        }
    }
}

const METRICS_SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

#[instrument(skip_all)]
fn setup_background_services(
    pool: PgPool,
    config: &Config,
    metrics_handle: Option<PrometheusHandle>,
    shutdown_token: CancellationToken,
) -> anyhow::Result<BackgroundServices> {
    let drop_guard = shutdown_token.clone().drop_guard();
    let mut background_tasks = Vec::new();

    if config.webhooks.enabled {
        let dispatcher = WebhookDispatcher::spawn(pool.clone(), &config.webhooks, shutdown_token.clone())?;
        background_tasks.push(tokio::spawn(dispatcher.run(config.webhooks.poll_interval, shutdown_token.clone())));
    } else {
        info!("Webhook dispatcher disabled");
    }

    if config.rate_limit.enabled {
        background_tasks.push(tokio::spawn(rate_limit::run_sweeper(
            pool.clone(),
            config.rate_limit.clone(),
            shutdown_token.clone(),
        )));
    }

    if let Some(handle) = metrics_handle {
        background_tasks.push(tokio::spawn(db::pool_metrics::run_pool_metrics_sampler(
            pool,
            METRICS_SAMPLE_INTERVAL,
            shutdown_token.clone(),
        )));

        // Histograms are only drained on upkeep
        let token = shutdown_token.clone();
        background_tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_SAMPLE_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => handle.run_upkeep(),
                    _ = token.cancelled() => break,
                }
            }
        }));
    }

    Ok(BackgroundServices {
        background_tasks,
        shutdown_token,
        drop_guard: Some(drop_guard),
    })
}

/// Top-level container owning the router, the pool and the background services.
///
/// 1. [`Application::new`] connects, migrates, wires optional services and starts background tasks
/// 2. [`Application::serve`] binds and serves until the shutdown future resolves
/// 3. On shutdown, background tasks are cancelled and awaited, the pool closed and telemetry flushed
pub struct Application {
    router: Router,
    config: Config,
    pool: PgPool,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting qrctl with configuration: {:#?}", config);

        let pool = setup_database(&config).await?;

        let metrics_handle = if config.enable_metrics {
            Some(PrometheusBuilder::new().install_recorder()?)
        } else {
            None
        };

        let email = match EmailService::new(&config) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                warn!(error = %e, "Email disabled: failed to build transport");
                None
            }
        };

        let payment_provider: Option<Arc<dyn PaymentProvider>> = config
            .payment
            .as_ref()
            .map(|payment| Arc::from(payment_providers::create_provider(payment)));
        if payment_provider.is_none() {
            info!("No payment provider configured; payment routes will answer 501");
        }

        let shutdown_token = CancellationToken::new();
        let bg_services = setup_background_services(pool.clone(), &config, metrics_handle.clone(), shutdown_token)?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .maybe_payment_provider(payment_provider)
            .maybe_email(email)
            .http_client(reqwest::Client::builder().user_agent(concat!("qrctl/", env!("CARGO_PKG_VERSION"))).build()?)
            .maybe_metrics_handle(metrics_handle)
            .build();

        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "qrctl listening on http://{}, public base URL {}",
            bind_addr, self.config.public_base_url
        );

        // Applied outside the router so `/api/v1/qr-codes/` reaches the same route
        let service = NormalizePathLayer::trim_trailing_slash().layer(self.router);

        axum::serve(listener, ServiceExt::<Request>::into_make_service(service))
            .with_graceful_shutdown(shutdown)
            .await?;

        self.bg_services.shutdown().await;

        info!("Closing database connections...");
        self.pool.close().await;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn healthz_answers_ok() {
        let server = create_test_server(create_test_state());
        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");
    }

    #[tokio::test]
    async fn api_references_are_served() {
        let server = create_test_server(create_test_state());

        let dashboard = server.get("/docs/openapi.json").await;
        dashboard.assert_status_ok();
        assert!(dashboard.text().contains("qrctl Dashboard API"));

        let developer = server.get("/docs/developer/openapi.json").await;
        developer.assert_status_ok();
        assert!(developer.text().contains("BearerAuth"));

        server.get("/docs").await.assert_status_ok();
        server.get("/docs/developer").await.assert_status_ok();
    }

    #[tokio::test]
    async fn metrics_route_requires_a_handle() {
        let server = create_test_server(create_test_state());
        server.get("/internal/metrics").await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dashboard_routes_require_a_session() {
        let mut config = create_test_config();
        config.auth.proxy_header.enabled = false;
        let server = create_test_server(create_test_state_with_config(config));

        for path in ["/api/qr-codes", "/api/organizations", "/api/notifications", "/api/admin/stats"] {
            server.get(path).await.assert_status(StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn cors_layer_accepts_configured_origins() {
        let mut config = create_test_config();
        config.auth.security.cors.allowed_origins = vec![
            CorsOrigin::Url("https://app.example.com/".parse().unwrap()),
            CorsOrigin::Url("http://localhost:5173".parse().unwrap()),
        ];
        assert!(create_cors_layer(&config).is_ok());
    }

    #[tokio::test]
    async fn background_services_stop_on_shutdown() {
        let config = create_test_config();
        let pool = lazy_pool(&config);
        let services = setup_background_services(pool, &config, None, CancellationToken::new()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), services.shutdown()).await.unwrap();
    }
}
