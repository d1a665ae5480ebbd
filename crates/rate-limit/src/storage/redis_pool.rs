//! Redis connection pool with health-checked recycling and idle reaping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use deadpool::managed::{self, Metrics};
use redis::{Client, RedisError, RedisResult, aio::MultiplexedConnection};
use secrecy::{ExposeSecret, SecretString};
use telemetry::metrics::pool_idle_closed;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use config::{RedisConfig, RedisTlsConfig};

/// Redis connection pool.
pub(crate) type Pool = deadpool::managed::Pool<Manager>;

/// Manager for Redis connections.
#[derive(Debug)]
pub(crate) struct Manager {
    client: Client,
    credentials: Option<Credentials>,
    ping_number: AtomicUsize,
}

#[derive(Debug)]
struct Credentials {
    username: Option<String>,
    password: SecretString,
}

impl Manager {
    /// Create a new Redis pool manager.
    pub fn new(config: &RedisConfig) -> RedisResult<Self> {
        let client = match config.tls.as_ref().filter(|tls| tls.enabled) {
            Some(tls_config) => {
                let tls_certs = build_tls_certificates(tls_config)?;
                let url = if tls_config.insecure.unwrap_or(false) && !config.url.ends_with("#insecure") {
                    format!("{}#insecure", config.url)
                } else {
                    config.url.clone()
                };

                Client::build_with_tls(url, tls_certs)?
            }
            None => Client::open(config.url.as_str())?,
        };

        let credentials = config.password.clone().map(|password| Credentials {
            username: config.username.clone(),
            password,
        });

        Ok(Self {
            client,
            credentials,
            ping_number: AtomicUsize::new(0),
        })
    }
}

impl managed::Manager for Manager {
    type Type = MultiplexedConnection;
    type Error = RedisError;

    async fn create(&self) -> Result<MultiplexedConnection, Self::Error> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        if let Some(credentials) = &self.credentials {
            let mut auth = redis::cmd("AUTH");

            if let Some(username) = &credentials.username {
                auth.arg(username);
            }

            auth.arg(credentials.password.expose_secret());
            auth.query_async::<()>(&mut conn).await?;

            log::debug!("Authenticated new Redis connection");
        }

        Ok(conn)
    }

    async fn recycle(&self, conn: &mut MultiplexedConnection, _: &Metrics) -> managed::RecycleResult<Self::Error> {
        let ping_number = self.ping_number.fetch_add(1, Ordering::Relaxed).to_string();

        let (n,) = redis::Pipeline::with_capacity(2)
            .cmd("UNWATCH")
            .ignore()
            .cmd("PING")
            .arg(&ping_number)
            .query_async::<(String,)>(conn)
            .await?;

        if n == ping_number {
            Ok(())
        } else {
            Err(managed::RecycleError::message("Invalid PING response"))
        }
    }
}

fn read_pem(path: &str, what: &'static str) -> RedisResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| RedisError::from((redis::ErrorKind::IoError, what, format!("{path}: {e}"))))
}

/// Build TLS certificates from configuration.
fn build_tls_certificates(config: &RedisTlsConfig) -> RedisResult<redis::TlsCertificates> {
    use redis::ClientTlsConfig;

    let client_tls = match (&config.client_cert_path, &config.client_key_path) {
        (Some(cert_path), Some(key_path)) => Some(ClientTlsConfig {
            client_cert: read_pem(cert_path, "Failed to read client certificate")?,
            client_key: read_pem(key_path, "Failed to read client key")?,
        }),
        (None, None) => None,
        _ => {
            return Err(RedisError::from((
                redis::ErrorKind::InvalidClientConfig,
                "Mutual TLS needs both client_cert_path and client_key_path",
            )));
        }
    };

    let root_cert = config
        .ca_cert_path
        .as_deref()
        .map(|path| read_pem(path, "Failed to read CA certificate"))
        .transpose()?;

    Ok(redis::TlsCertificates { client_tls, root_cert })
}

/// Create a Redis connection pool from configuration.
pub(crate) fn create_pool(config: &RedisConfig) -> RedisResult<Pool> {
    let manager = Manager::new(config)?;

    let mut pool_config = deadpool::managed::PoolConfig::default();

    if let Some(max_size) = config.pool.max_size {
        pool_config.max_size = max_size;
    }

    if let Some(timeout_create) = config.pool.timeout_create {
        pool_config.timeouts.create = Some(timeout_create);
    }

    if let Some(timeout_wait) = config.pool.timeout_wait {
        pool_config.timeouts.wait = Some(timeout_wait);
    }

    if let Some(timeout_recycle) = config.pool.timeout_recycle {
        pool_config.timeouts.recycle = Some(timeout_recycle);
    }

    let pool = Pool::builder(manager)
        .config(pool_config)
        .runtime(deadpool::Runtime::Tokio1)
        .build()
        .map_err(|e| RedisError::from((redis::ErrorKind::IoError, "Failed to create pool", e.to_string())))?;

    Ok(pool)
}

/// Periodically close pooled connections that have not been used for `idle_timeout`.
///
/// The task runs until the returned guard is dropped.
pub(crate) fn spawn_idle_reaper(pool: Pool, idle_timeout: Duration) -> DropGuard {
    let token = CancellationToken::new();
    let cancelled = token.clone();
    let period = (idle_timeout / 2).max(Duration::from_secs(1));
    let closed = pool_idle_closed();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = interval.tick() => {
                    let removed = pool.retain(|_, metrics| metrics.last_used() < idle_timeout).removed.len();

                    if removed > 0 {
                        log::debug!("Closed {removed} idle Redis connections");
                        closed.add(removed as u64, &[]);
                    }
                }
            }
        }

        log::debug!("Redis pool idle reaper stopped");
    });

    token.drop_guard()
}
