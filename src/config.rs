use std::env;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Server (health/ready/metrics only)
    pub host: String,
    pub port: u16,

    // Database
    pub database_url: String,
    pub db_max_connections: u32,

    // Redis
    pub redis_url: String,

    // MT4 bridge -- process-level credentials, never user credentials
    pub mt4_bridge_url: String,
    pub mt4_bridge_username: String,
    pub mt4_bridge_password: String,
    pub mt4_http_timeout_ms: u64,
    pub mt4_retry_base_delay_ms: u64,
    pub mt4_max_retries: u32,

    // Fixed lot sizing policy
    pub mt4_default_lot_size: String,
    pub mt4_min_lot_size: String,
    pub mt4_max_lot_size: String,

    // Order poller
    pub mt4_poll_interval_ms: u64,
    pub mt4_poll_max_attempts: u32,

    // Position monitor
    pub mt4_monitor_tick_secs: u64,

    // Credential-store encryption, shared with other subsystems
    pub encryption_key: String,

    // LLM exit-signal panel
    pub exit_signal_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            host: env("HOST", "0.0.0.0"),
            port: env("PORT", "8000").parse().expect("PORT must be a number"),

            database_url: require_env("DATABASE_URL"),
            db_max_connections: env("DB_MAX_CONNECTIONS", "20").parse().unwrap_or(20),

            redis_url: env("REDIS_URL", "redis://127.0.0.1:6379"),

            mt4_bridge_url: env("MT4_BRIDGE_URL", "http://localhost:8080"),
            mt4_bridge_username: require_env("MT4_BRIDGE_USERNAME"),
            mt4_bridge_password: require_env("MT4_BRIDGE_PASSWORD"),
            mt4_http_timeout_ms: env("MT4_HTTP_TIMEOUT_MS", "5000").parse().unwrap_or(5000),
            mt4_retry_base_delay_ms: env("MT4_RETRY_BASE_DELAY_MS", "500").parse().unwrap_or(500),
            mt4_max_retries: env("MT4_MAX_RETRIES", "3").parse().unwrap_or(3),

            mt4_default_lot_size: env("MT4_DEFAULT_LOT_SIZE", "0.10"),
            mt4_min_lot_size: env("MT4_MIN_LOT_SIZE", "0.01"),
            mt4_max_lot_size: env("MT4_MAX_LOT_SIZE", "1.0"),

            mt4_poll_interval_ms: env("MT4_POLL_INTERVAL_MS", "2000").parse().unwrap_or(2000),
            mt4_poll_max_attempts: env("MT4_POLL_MAX_ATTEMPTS", "30").parse().unwrap_or(30),

            mt4_monitor_tick_secs: env("MT4_MONITOR_TICK_SECS", "60").parse().unwrap_or(60),

            encryption_key: require_env("ENCRYPTION_KEY"),

            exit_signal_url: env("EXIT_SIGNAL_URL", "http://localhost:9100/api/v1/exit-signal"),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        format!("{}:{}", self.host, self.port).parse().expect("invalid address")
    }

    pub fn mt4_http_timeout(&self) -> Duration {
        Duration::from_millis(self.mt4_http_timeout_ms)
    }

    pub fn mt4_retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.mt4_retry_base_delay_ms)
    }

    pub fn mt4_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mt4_poll_interval_ms)
    }

    pub fn mt4_monitor_tick(&self) -> Duration {
        Duration::from_secs(self.mt4_monitor_tick_secs)
    }
}

fn env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

#[allow(dead_code)]
fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn require_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
