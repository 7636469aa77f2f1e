use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::{error::AppError, models::settings::NotificationTemplates};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub listen_addr: SocketAddr,
    pub catalog_file: Option<PathBuf>,
    pub channel: ChannelSettings,
    pub safety: SafetySettings,
    pub route: RouteSettings,
    pub templates: NotificationTemplates,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Location samples arriving faster than this are dropped.
    pub location_min_interval: Duration,
    /// At most one sample per interval is persisted for replay.
    pub location_persist_interval: Duration,
    pub shards: usize,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            location_min_interval: Duration::from_millis(1000),
            location_persist_interval: Duration::from_secs(10),
            shards: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetySettings {
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteSettings {
    pub road_factor: f64,
    pub average_speed_kmh: f64,
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            road_factor: 1.3,
            average_speed_kmh: 30.0,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tripcore.db".to_string());
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let catalog_file = env::var("CATALOG_FILE").ok().map(PathBuf::from);

        let channel = ChannelSettings {
            location_min_interval: Duration::from_millis(parse_var(
                "LOCATION_MIN_INTERVAL_MS",
                1000,
            )?),
            location_persist_interval: Duration::from_secs(parse_var(
                "LOCATION_PERSIST_INTERVAL_SECS",
                10,
            )?),
            ..ChannelSettings::default()
        };

        let safety = SafetySettings {
            window: Duration::from_secs(parse_var("SAFETY_WINDOW_SECS", 60)?),
            cooldown: Duration::from_secs(parse_var("SAFETY_COOLDOWN_SECS", 300)?),
        };

        let route = RouteSettings {
            road_factor: parse_var("ROUTE_ROAD_FACTOR", 1.3)?,
            average_speed_kmh: parse_var("ROUTE_AVERAGE_SPEED_KMH", 30.0)?,
        };
        if route.average_speed_kmh <= 0.0 || route.road_factor <= 0.0 {
            return Err(AppError::Config(
                "route factors must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            listen_addr,
            catalog_file,
            channel,
            safety,
            route,
            templates: NotificationTemplates::default(),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {name}: {err}"))),
        Err(_) => Ok(default),
    }
}
