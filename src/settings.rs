use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Yookassa {
    pub url: String,
    pub shop_id: String,
    pub secret_key: String,
    pub return_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Telegram {
    pub api_url: String,
    pub bot_token: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Credits {
    pub service_cost: i32,
    pub first_service_free: bool,
    pub referral_bonus: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    pub listen_addr: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sweeper {
    pub interval_secs: u64,
    pub min_age_secs: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub yookassa: Yookassa,
    pub telegram: Telegram,
    pub credits: Credits,
    pub http: Http,
    pub sweeper: Sweeper,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config.toml"))
            .build()?;

        config.try_deserialize()
    }
}
