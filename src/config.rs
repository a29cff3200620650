//! Minimal runtime configuration helpers.
//! Everything comes from the environment, optionally seeded from a .env file.

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct Config {
    /// BluConsole REST host, e.g. "https://console.example.com".
    pub blu_base_url: String,
    pub blu_username: String,
    pub blu_password: String,
    /// Completion provider key. Chat answering is skipped when unset.
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let blu_base_url = required("BLU_BASE_URL")?;
        let blu_username = required("BLU_USERNAME")?;
        let blu_password = required("BLU_PASSWORD")?;

        let openai_api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            _ => None,
        };
        let openai_base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        let openai_model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());

        Ok(Config {
            blu_base_url,
            blu_username,
            blu_password,
            openai_api_key,
            openai_base_url,
            openai_model,
        })
    }
}

fn required(name: &str) -> Result<String, String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(format!("Missing {}: set it in the environment or a .env file", name)),
    }
}
