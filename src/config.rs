use serde::{Deserialize, Serialize};
use std::env;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub lottery: LotterySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub access_token_expires_in: i64, // seconds
}

/// Process-wide lottery tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotterySettings {
    /// 号码占用有效期 (秒)
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: i64,
    /// 定时扫描间隔 (秒)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// 免费活动是否跳过支付直接确认
    #[serde(default = "default_free_lottery_auto_confirm")]
    pub free_lottery_auto_confirm: bool,
    /// 可用号码列表单次返回上限
    #[serde(default = "default_available_list_limit")]
    pub available_list_limit: u64,
}

fn default_reservation_ttl_secs() -> i64 {
    900
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_free_lottery_auto_confirm() -> bool {
    true
}

fn default_available_list_limit() -> u64 {
    500
}

impl Default for LotterySettings {
    fn default() -> Self {
        Self {
            reservation_ttl_secs: default_reservation_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            free_lottery_auto_confirm: default_free_lottery_auto_confirm(),
            available_list_limit: default_available_list_limit(),
        }
    }
}

impl LotterySettings {
    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.reservation_ttl_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("LOTTERY_RESERVATION_TTL_SECS") {
            self.reservation_ttl_secs = v;
        }
        if let Some(v) = env_parse("LOTTERY_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = v;
        }
        if let Some(v) = env_parse("LOTTERY_FREE_AUTO_CONFIRM") {
            self.free_lottery_auto_confirm = v;
        }
        if let Some(v) = env_parse("LOTTERY_AVAILABLE_LIST_LIMIT") {
            self.available_list_limit = v;
        }
    }
}

/// Shared, hot-reloadable view of [`LotterySettings`].
///
/// Services read a copy on every call; only the reload path replaces it.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<LotterySettings>>,
}

impl SettingsHandle {
    pub fn new(settings: LotterySettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn current(&self) -> LotterySettings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, settings: LotterySettings) {
        match self.inner.write() {
            Ok(mut guard) => *guard = settings,
            Err(poisoned) => *poisoned.into_inner() = settings,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    pub fn from_toml() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
        use std::io::ErrorKind;

        // 尝试读取配置文件，如果不存在则完全依赖环境变量
        let mut config: Config = match std::fs::read_to_string(&config_path) {
            Ok(config_str) => Self::parse(&config_str)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fn get_env(name: &str) -> Option<String> {
                    env::var(name).ok()
                }

                // 数据库 URL 在无配置文件时必须提供
                let database_url = get_env("DATABASE_URL")
                    .ok_or("DATABASE_URL is not set and no config.toml was found")?;

                Config {
                    server: ServerConfig {
                        host: get_env("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                        port: env_parse("SERVER_PORT").unwrap_or(8080u16),
                    },
                    database: DatabaseConfig {
                        url: database_url,
                        max_connections: env_parse("DB_MAX_CONNECTIONS").unwrap_or(10u32),
                    },
                    jwt: JwtConfig {
                        secret: get_env("JWT_SECRET")
                            .unwrap_or_else(|| "change-me-in-production".to_string()),
                        access_token_expires_in: env_parse("JWT_ACCESS_EXPIRES_IN")
                            .unwrap_or(7200i64),
                    },
                    lottery: LotterySettings::default(),
                }
            }
            Err(e) => {
                return Err(format!("failed to read config file {config_path}: {e}").into());
            }
        };

        // 环境变量覆盖（即便文件存在时也覆盖）
        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a TOML document into a config.
    pub fn parse(config_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        toml::from_str(config_str).map_err(|e| format!("failed to parse config file: {e}").into())
    }

    /// Re-read only the `[lottery]` section, used by the SIGHUP reload path.
    pub fn reload_lottery_settings() -> Result<LotterySettings, Box<dyn std::error::Error>> {
        Ok(Self::from_toml()?.lottery)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("SERVER_HOST") {
            self.server.host = v;
        }
        if let Some(p) = env_parse("SERVER_PORT") {
            self.server.port = p;
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(mc) = env_parse("DB_MAX_CONNECTIONS") {
            self.database.max_connections = mc;
        }
        if let Ok(v) = env::var("JWT_SECRET") {
            self.jwt.secret = v;
        }
        if let Some(n) = env_parse("JWT_ACCESS_EXPIRES_IN") {
            self.jwt.access_token_expires_in = n;
        }
        self.lottery.apply_env_overrides();
    }
}
