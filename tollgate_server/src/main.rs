//! Serves the `tollgate` auth routes over HTTP

use std::{net::SocketAddr, sync::Arc};

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{self, WrapErr};
use tollgate::jwt::HmacSecret;
use tollgate_auth::{
    session::in_memory::InMemorySessionCache, Argon2Verifier, AuthConfig, AuthService,
    FixedWindowRateLimiter, InMemoryPrincipalRepository, NoopRateLimiter, RateLimiter,
    SessionCache,
};
use tollgate_axum::{AuthState, CookieMode};
use tollgate_clock::DurationSecs;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Opts {
    /// Secret used to sign tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Access token lifetime, in seconds
    #[arg(long, env = "JWT_ACCESS_TTL", default_value_t = 15 * 60)]
    access_ttl: u64,

    /// Refresh token lifetime, in seconds
    #[arg(long, env = "JWT_REFRESH_TTL", default_value_t = 7 * 24 * 60 * 60)]
    refresh_ttl: u64,

    /// Grace period accepted past a token's expiry, in seconds
    #[arg(long, env = "JWT_LEEWAY", default_value_t = 0)]
    leeway: u64,

    /// Address to listen on
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:3030")]
    listen_addr: SocketAddr,

    /// Redis server holding refresh sessions; sessions are kept in memory
    /// when absent
    #[arg(long, env = "REDIS_URL", hide_env_values = true)]
    redis_url: Option<String>,

    /// Whether tokens are also delivered as cookies
    #[arg(long, env = "COOKIE_MODE", value_enum, default_value_t = CookieArg::Disabled)]
    cookie_mode: CookieArg,

    /// Sign-in attempts allowed per email each minute; 0 disables the limit
    #[arg(long, env = "SIGN_IN_LIMIT", default_value_t = 5)]
    sign_in_limit: u32,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum CookieArg {
    /// Tokens only in response bodies
    Disabled,
    /// Cookies sent over plain HTTP too
    Insecure,
    /// Cookies restricted to HTTPS
    Secure,
}

impl From<CookieArg> for CookieMode {
    fn from(arg: CookieArg) -> Self {
        match arg {
            CookieArg::Disabled => CookieMode::Disabled,
            CookieArg::Insecure => CookieMode::Enabled { secure: false },
            CookieArg::Secure => CookieMode::Enabled { secure: true },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

impl Opts {
    fn auth_config(&self) -> eyre::Result<AuthConfig> {
        let secret = HmacSecret::new(self.jwt_secret.as_bytes())
            .wrap_err("JWT_SECRET must not be empty")?;

        Ok(AuthConfig::new(secret)
            .with_access_ttl(DurationSecs(self.access_ttl))
            .with_refresh_ttl(DurationSecs(self.refresh_ttl))
            .with_leeway(DurationSecs(self.leeway)))
    }

    fn rate_limiter(&self) -> Arc<dyn RateLimiter> {
        if self.sign_in_limit == 0 {
            Arc::new(NoopRateLimiter)
        } else {
            Arc::new(FixedWindowRateLimiter::new(
                self.sign_in_limit,
                tollgate_auth::rate_limit::DEFAULT_WINDOW,
            ))
        }
    }

    async fn session_cache(&self) -> eyre::Result<Arc<dyn SessionCache>> {
        match &self.redis_url {
            #[cfg(feature = "redis")]
            Some(url) => {
                let cache = tollgate_auth::session::redis::RedisSessionCache::connect(url)
                    .await
                    .wrap_err("unable to connect to the session cache")?;
                Ok(Arc::new(cache))
            }
            #[cfg(not(feature = "redis"))]
            Some(_) => Err(eyre::eyre!("built without redis support")),
            None => {
                tracing::warn!("REDIS_URL not set, refresh sessions are held in memory");
                Ok(Arc::new(InMemorySessionCache::new()))
            }
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn build_state(opts: &Opts) -> eyre::Result<AuthState> {
    let config = opts.auth_config()?;
    let service = AuthService::new(
        Arc::new(InMemoryPrincipalRepository::new()),
        opts.session_cache().await?,
        Arc::new(Argon2Verifier::new()?),
        config.codec(),
        &config,
    )
    .with_rate_limiter(opts.rate_limiter());

    Ok(AuthState::new(Arc::new(service)).with_cookie_mode(opts.cookie_mode.into()))
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "unable to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    init_tracing(opts.log_format);

    let state = build_state(&opts).await?;
    let app = tollgate_axum::router(state);

    let listener = tokio::net::TcpListener::bind(opts.listen_addr)
        .await
        .wrap_err_with(|| format!("unable to bind {}", opts.listen_addr))?;
    tracing::info!(addr = %opts.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
