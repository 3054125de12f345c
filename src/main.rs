use axum::{
    extract::ConnectInfo,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use insforge_server::config::Config;
use insforge_server::realtime::{Dispatcher, WebhookSender};
use insforge_server::state::AppState;
use insforge_server::{db, handlers};

/// Restricts `/metrics` to loopback connections.
async fn require_loopback(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    match connect_info {
        Some(ConnectInfo(addr)) if addr.ip().is_loopback() => next.run(req).await,
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "insforge_server=info,tower_http=info,sqlx=warn"
            .parse()
            .unwrap()
    });

    if std::env::var("APP_ENV").as_deref() == Ok("production") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Insforge server core starting...");

    let config = Config::from_env().expect("Failed to load configuration");
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    db::health_check(&pool).await.expect("Database health check failed");
    info!("Database health check passed");

    let database_url = config.database_url.clone();
    let addr = config.server_addr();

    let cors = if config.is_dev {
        info!("CORS: permissive (dev mode)");
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        if origins.is_empty() {
            tracing::warn!("CORS: no ALLOWED_ORIGINS configured — all cross-origin requests will be denied");
        } else {
            info!("CORS: production mode, allowing origins: {:?}", config.allowed_origins);
        }
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, "x-csrf-token".parse().unwrap()])
    };

    let app_state = AppState::new(pool.clone(), config).expect("Failed to build application state");

    // Dispatcher (C10) owns its own dedicated, non-pooled LISTEN connection
    // and runs for the lifetime of the process.
    let dispatcher = Dispatcher::new(
        pool.clone(),
        database_url,
        app_state.hub.clone(),
        WebhookSender::new(),
    );
    tokio::spawn(dispatcher.run());

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    // Global limit: 10 req/s per IP, burst 20.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .finish()
            .expect("Invalid global governor configuration"),
    );

    // Stricter limit for the credential-bearing auth endpoints: 2 req/s, burst 5.
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(5)
            .finish()
            .expect("Invalid auth governor configuration"),
    );

    let auth_router = Router::new()
        .route("/auth/users", post(handlers::auth::register))
        .route("/auth/sessions", post(handlers::auth::login))
        .route("/auth/exchange", post(handlers::auth::exchange))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/admin/sessions", post(handlers::auth::admin_login))
        .route(
            "/auth/admin/sessions/exchange",
            post(handlers::auth::admin_login_exchange),
        )
        .route_layer(GovernorLayer {
            config: auth_governor_conf,
        });

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(move || async move { metric_handle.render() })
                .route_layer(middleware::from_fn(require_loopback)),
        )
        .merge(auth_router)
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/email/send-verification", post(handlers::auth::send_verification_email))
        .route("/auth/email/verify", post(handlers::auth::verify_email))
        .route(
            "/auth/email/send-reset-password",
            post(handlers::auth::send_reset_password_email),
        )
        .route(
            "/auth/email/exchange-reset-password-token",
            post(handlers::auth::exchange_reset_password_token),
        )
        .route("/auth/email/reset-password", post(handlers::auth::reset_password))
        .route("/auth/sessions/current", get(handlers::auth::current_session))
        .route("/auth/public-config", get(handlers::auth::public_config))
        .route("/auth/config", get(handlers::auth::get_config))
        .route("/auth/config", put(handlers::auth::put_config))
        .route("/auth/users", get(handlers::auth::list_users))
        .route("/auth/users", delete(handlers::auth::delete_users))
        .route("/auth/users/:id", get(handlers::auth::get_user))
        .route("/auth/tokens/anon", post(handlers::auth::issue_anon_token))
        .route(
            "/auth/oauth/:provider/authorize",
            get(handlers::auth::oauth_authorize_get).post(handlers::auth::oauth_authorize_post),
        )
        .route(
            "/auth/oauth/:provider/callback",
            get(handlers::auth::oauth_callback_get).post(handlers::auth::oauth_callback_post),
        )
        .route("/database/query", post(handlers::database::run_query))
        .route("/ws", get(handlers::ws::websocket_handler))
        // Anything else is a table/RPC path meant for PostgREST.
        .fallback(handlers::postgrest::forward)
        .layer(GovernorLayer { config: governor_conf })
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(prometheus_layer)
        .layer(cors)
        .with_state(app_state);

    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server failed to start");
}
