use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_base: String,
    pub api_key: String,
    #[serde(default)]
    pub organization: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub default_model: String,
    pub supported_models: Vec<String>,
    pub rate_limit_window_secs: i64,
    pub rate_limit_tries: u32,
    /// Titles are regenerated once a conversation holds more messages than this.
    pub title_threshold: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-3.5-turbo".to_string(),
            supported_models: vec![
                "gpt-3.5-turbo".to_string(),
                "gpt-3.5-turbo-0301".to_string(),
            ],
            rate_limit_window_secs: 3600,
            rate_limit_tries: 10,
            title_threshold: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImagesConfig {
    pub count: u32,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self { count: 2 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub images: ImagesConfig,
}

impl AppConfig {
    pub fn load(path: &str) -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("CHATTER").separator("__"))
            .build()?;

        let mut app_config: AppConfig = settings.try_deserialize()?;

        // Values written as ${VAR} are resolved from the environment
        app_config.database.path = expand_env(&app_config.database.path);
        app_config.openai.api_base = expand_env(&app_config.openai.api_base);
        app_config.openai.api_key = expand_env(&app_config.openai.api_key);
        app_config.openai.organization = app_config
            .openai
            .organization
            .as_deref()
            .map(expand_env)
            .filter(|org| !org.is_empty());

        Ok(app_config)
    }
}

fn expand_env(val: &str) -> String {
    match val.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).unwrap_or_default(),
        None => val.to_string(),
    }
}
