use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::response::IntoResponse;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use subscription_billing::config::Config;
use subscription_billing::db::{
    self, postgres_plan_repository::PostgresPlanRepository,
    postgres_subscription_repository::PostgresSubscriptionRepository,
    postgres_user_repository::PostgresUserRepository,
};
use subscription_billing::responses::JsonResponse;
use subscription_billing::routes::app_router;
use subscription_billing::services::stripe::LiveStripeService;
use subscription_billing::utils::jwt::JwtKeys;
use subscription_billing::AppState;

#[cfg(feature = "tls")]
use axum_server::tls_rustls::RustlsConfig;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };
    let jwt_keys = JwtKeys::from_secret(&config.jwt_secret).context("invalid JWT_SECRET")?;

    let pg_pool = establish_connection(&config.database_url).await?;
    db::run_migrations(&pg_pool)
        .await
        .context("failed to run database migrations")?;

    let stripe = LiveStripeService::from_settings(&config.stripe);
    let bind_addr = config.bind_addr;
    let cors = CorsLayer::new()
        .allow_origin(
            config
                .app_base_url
                .parse::<HeaderValue>()
                .context("APP_BASE_URL is not a valid origin")?,
        )
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .allow_credentials(true);

    let state = AppState {
        users: Arc::new(PostgresUserRepository {
            pool: pg_pool.clone(),
        }),
        plans: Arc::new(PostgresPlanRepository {
            pool: pg_pool.clone(),
        }),
        subscriptions: Arc::new(PostgresSubscriptionRepository { pool: pg_pool }),
        stripe: Arc::new(stripe),
        config: Arc::new(config),
        jwt_keys: Arc::new(jwt_keys),
    };

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(env_or("RATE_LIMITER_MILLISECONDS", 200))
            .burst_size(env_or("RATE_LIMITER_BURST", 20))
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .context("invalid rate limiter settings")?,
    );
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
        governor_limiter.retain_recent();
    });

    let app = app_router(state)
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    #[cfg(feature = "tls")]
    {
        let cert = std::env::var("DEV_CERT_LOCATION").context("DEV_CERT_LOCATION must be set")?;
        let key = std::env::var("DEV_KEY_LOCATION").context("DEV_KEY_LOCATION must be set")?;
        let tls_config = RustlsConfig::from_pem_file(cert, key)
            .await
            .context("failed to load TLS certs")?;

        info!(%bind_addr, "listening with TLS");
        axum_server::bind_rustls(bind_addr, tls_config)
            .serve(make_service)
            .await?;
        return Ok(());
    }

    #[allow(unreachable_code)]
    {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        info!(%bind_addr, "listening");
        axum::serve(listener, make_service).await?;
        Ok(())
    }
}

/// Connect to the database and verify it.
async fn establish_connection(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to the database")?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("failed to verify database connection")?;

    info!("connected to the database");
    Ok(pool)
}
