use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Payments {
    pub url: String,
    pub api_key: String,
    pub callback_secret: String,
}

#[derive(Debug, Deserialize)]
pub struct Mailer {
    pub url: String,
    pub auth_token: String,
    pub operator_email: String,
}

#[derive(Debug, Deserialize)]
pub struct Crew {
    pub url: String,
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Withdrawals {
    pub min_amount: f64,
    pub open_hour: u32,
    pub close_hour: u32,
    pub utc_offset_hours: i32,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub payments: Payments,
    pub mailer: Mailer,
    pub crew: Crew,
    pub withdrawals: Withdrawals,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .build()?;

        config.try_deserialize()
    }
}
