use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreBackend,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub messaging: MessagingConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
}

#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub max_body_chars: usize,
    pub default_page_size: i64,
    pub max_page_size: i64,
    pub store_timeout: Duration,
    pub ws_channel_capacity: usize,
    pub sent_cache_size: usize,
    pub presence_ttl: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_body_chars: 4000,
            default_page_size: 50,
            max_page_size: 200,
            store_timeout: Duration::from_millis(5000),
            ws_channel_capacity: 256,
            sent_cache_size: 128,
            presence_ttl: Duration::from_secs(300),
        }
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let messaging_defaults = MessagingConfig::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("SERVER_PORT", 8080),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                max_body_bytes: var_or("MAX_BODY_BYTES", 64 * 1024),
            },
            store: var_or("STORE_BACKEND", StoreBackend::Postgres),
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: var_or("DB_PORT", 5432),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
                database: env::var("DB_NAME").unwrap_or_else(|_| "marketplace_chat".to_string()),
                ssl_mode: env::var("DB_SSL_MODE").unwrap_or_else(|_| "disable".to_string()),
                max_connections: var_or("DB_MAX_CONNS", 25),
            },
            redis: RedisConfig {
                enabled: var_or("REDIS_ENABLED", true),
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: var_or("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok(),
                db: var_or("REDIS_DB", 0),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET")
                    .unwrap_or_else(|_| "super-secret-jwt-key-change-in-production".to_string()),
                issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "marketplace".to_string()),
            },
            messaging: MessagingConfig {
                max_body_chars: var_or("MESSAGE_MAX_BODY_CHARS", messaging_defaults.max_body_chars),
                default_page_size: var_or(
                    "MESSAGE_PAGE_DEFAULT",
                    messaging_defaults.default_page_size,
                ),
                max_page_size: var_or("MESSAGE_PAGE_MAX", messaging_defaults.max_page_size),
                store_timeout: Duration::from_millis(var_or("STORE_TIMEOUT_MS", 5000)),
                ws_channel_capacity: var_or(
                    "WS_CHANNEL_CAPACITY",
                    messaging_defaults.ws_channel_capacity,
                ),
                sent_cache_size: var_or("WS_SENT_CACHE_SIZE", messaging_defaults.sent_cache_size),
                presence_ttl: Duration::from_secs(var_or("PRESENCE_TTL_SECS", 300)),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.ssl_mode
        )
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_store_backend() {
        assert_eq!("postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn redis_url_includes_password_when_set() {
        let mut config = Config::load();
        config.redis.host = "cache".into();
        config.redis.port = 6380;
        config.redis.db = 2;
        config.redis.password = Some("pw".into());
        assert_eq!(config.redis_url(), "redis://:pw@cache:6380/2");
        config.redis.password = None;
        assert_eq!(config.redis_url(), "redis://cache:6380/2");
    }
}
