use crate::{Error, Result, TradingMode};

/// Deployment settings and secrets loaded from environment variables at startup.
/// Trading behaviour lives in the TOML file at `bot_config_path`.
#[derive(Debug, Clone)]
pub struct Config {
    // Exchange credentials (may be empty in paper mode)
    pub bitvavo_api_key: String,
    pub bitvavo_secret: String,

    // Telegram
    pub telegram_token: String,
    pub telegram_allowed_user_ids: Vec<i64>,

    // HTTP front door
    pub dashboard_token: String,
    pub dashboard_port: u16,

    // Trading
    pub trading_mode: TradingMode,
    pub paper_slippage_bps: f64,

    // Database
    pub database_url: String,

    // Trading config file path
    pub bot_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let trading_mode = parse_mode(&required_env("TRADING_MODE")?)?;
        let telegram_allowed_user_ids = parse_user_ids(&required_env("TELEGRAM_ALLOWED_USER_IDS")?)?;

        let (bitvavo_api_key, bitvavo_secret) = match trading_mode {
            TradingMode::Live => (
                required_env("BITVAVO_API_KEY")?,
                required_env("BITVAVO_API_SECRET")?,
            ),
            TradingMode::Paper => (
                optional_env("BITVAVO_API_KEY").unwrap_or_default(),
                optional_env("BITVAVO_API_SECRET").unwrap_or_default(),
            ),
        };

        Ok(Config {
            bitvavo_api_key,
            bitvavo_secret,
            telegram_token: required_env("TELEGRAM_TOKEN")?,
            telegram_allowed_user_ids,
            dashboard_token: required_env("DASHBOARD_TOKEN")?,
            dashboard_port: optional_env("DASHBOARD_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            trading_mode,
            paper_slippage_bps: optional_env("PAPER_SLIPPAGE_BPS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10.0),
            database_url: optional_env("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://scalper.db?mode=rwc".to_string()),
            bot_config_path: optional_env("BOT_CONFIG_PATH")
                .unwrap_or_else(|| "config/bot.toml".to_string()),
        })
    }
}

fn parse_mode(raw: &str) -> Result<TradingMode> {
    match raw.trim().to_lowercase().as_str() {
        "paper" => Ok(TradingMode::Paper),
        "live" => Ok(TradingMode::Live),
        other => Err(Error::Config(format!(
            "TRADING_MODE must be 'paper' or 'live', got: '{other}'"
        ))),
    }
}

fn parse_user_ids(raw: &str) -> Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>().map_err(|_| {
                Error::Config(format!(
                    "TELEGRAM_ALLOWED_USER_IDS contains non-numeric ID: '{s}'"
                ))
            })
        })
        .collect()
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}
