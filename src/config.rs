use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};

pub const ROOM_CAPACITY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub default_max_participants: usize,
    /// A connection that sends nothing for this long, not even a pong, is
    /// dropped and its participant leaves.
    pub idle_timeout: Duration,
    /// How often the server pings each socket. Must be shorter than
    /// `idle_timeout` so a quiet but healthy client answers in time.
    pub ping_interval: Duration,
    pub broadcast_capacity: usize,
    /// A room minted over HTTP that nobody joins within this window is
    /// forgotten.
    pub pending_room_ttl: Duration,
    pub max_pending_rooms: usize,
    pub cors_origin: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            default_max_participants: 10,
            idle_timeout: Duration::from_secs(120),
            ping_interval: Duration::from_secs(30),
            broadcast_capacity: 64,
            pending_room_ttl: Duration::from_secs(15 * 60),
            max_pending_rooms: 1000,
            cors_origin: None,
        }
    }
}

impl Config {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> anyhow::Result<Config> {
        let _ = dotenv::dotenv();
        let defaults = Config::default();

        let default_max_participants = var_or("DEFAULT_MAX_PARTICIPANTS", defaults.default_max_participants)?;
        if !(1..=ROOM_CAPACITY_LIMIT).contains(&default_max_participants) {
            return Err(anyhow!(
                "DEFAULT_MAX_PARTICIPANTS must be between 1 and {ROOM_CAPACITY_LIMIT}"
            ));
        }

        let broadcast_capacity = var_or("BROADCAST_CAPACITY", defaults.broadcast_capacity)?;
        if broadcast_capacity == 0 {
            return Err(anyhow!("BROADCAST_CAPACITY must be positive"));
        }

        let idle_timeout = Duration::from_secs(var_or("IDLE_TIMEOUT_SECS", defaults.idle_timeout.as_secs())?);
        let ping_interval = Duration::from_secs(var_or("PING_INTERVAL_SECS", defaults.ping_interval.as_secs())?);
        if ping_interval.is_zero() || ping_interval >= idle_timeout {
            return Err(anyhow!("PING_INTERVAL_SECS must be positive and below IDLE_TIMEOUT_SECS"));
        }

        Ok(Config {
            bind_addr: var_or("BIND_ADDR", defaults.bind_addr)?,
            default_max_participants,
            idle_timeout,
            ping_interval,
            broadcast_capacity,
            pending_room_ttl: Duration::from_secs(var_or("PENDING_ROOM_TTL_SECS", defaults.pending_room_ttl.as_secs())?),
            max_pending_rooms: var_or("MAX_PENDING_ROOMS", defaults.max_pending_rooms)?,
            cors_origin: dotenv::var("CORS_ORIGIN").ok().filter(|s| !s.trim().is_empty()),
        })
    }
}

fn var_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}
