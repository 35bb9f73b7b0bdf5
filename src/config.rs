use std::env;
use std::path::PathBuf;

/// Process configuration. Credentials and paths come from the environment;
/// tunables that an operator may change at runtime (poll interval, fetch
/// limit, media settings) live in the `settings` table instead.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_path: String,
    pub listen_addr: String,
    pub media_dir: PathBuf,
    pub vk_token: Option<String>,
    pub vk_api_version: String,
    pub tg_api_id: Option<i32>,
    pub tg_api_hash: Option<String>,
    pub tg_session_file: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "newsdesk.db".to_string()),
            listen_addr: env::var("AUTH_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8085".to_string()),
            media_dir: env::var("MEDIA_DIR")
                .unwrap_or_else(|_| "media".to_string())
                .into(),
            vk_token: env::var("VK_TOKEN").ok().filter(|token| !token.is_empty()),
            vk_api_version: env::var("VK_API_VERSION").unwrap_or_else(|_| "5.131".to_string()),
            tg_api_id: env::var("TG_API_ID").ok().and_then(|id| id.parse().ok()),
            tg_api_hash: env::var("TG_API_HASH").ok().filter(|hash| !hash.is_empty()),
            tg_session_file: env::var("TG_SESSION_FILE")
                .unwrap_or_else(|_| "secrets/telegram.session".to_string())
                .into(),
        }
    }
}
