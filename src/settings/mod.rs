use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use duckdb::Connection;
use tracing::{info, warn};

use crate::db::preferences::{self, PreferenceStore};
use crate::db::{lock, DbPool, StoreResult};
use crate::llm::CompletionClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemeSetting {
    Dark,
    Light,
    #[default]
    System,
}

impl ThemeSetting {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeSetting::Dark => "Dark",
            ThemeSetting::Light => "Light",
            ThemeSetting::System => "System",
        }
    }
}

impl fmt::Display for ThemeSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeSetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dark" => Ok(ThemeSetting::Dark),
            "light" => Ok(ThemeSetting::Light),
            "system" => Ok(ThemeSetting::System),
            other => Err(format!("unknown theme '{}', expected dark, light or system", other)),
        }
    }
}

/// User-facing settings backed by the preference store.
pub struct Settings;

impl Settings {
    pub fn theme(conn: &Connection) -> StoreResult<ThemeSetting> {
        let stored = PreferenceStore::get_string(conn, preferences::THEME)?;
        Ok(match stored {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("ignoring stored theme: {}", e);
                ThemeSetting::default()
            }),
            None => ThemeSetting::default(),
        })
    }

    pub fn set_theme(conn: &Connection, theme: ThemeSetting) -> StoreResult<()> {
        PreferenceStore::set_string(conn, preferences::THEME, theme.as_str())
    }

    pub fn api_model(conn: &Connection, default_model: &str) -> StoreResult<String> {
        Ok(PreferenceStore::get_string(conn, preferences::API_MODEL)?
            .unwrap_or_else(|| default_model.to_string()))
    }

    pub fn set_api_model(conn: &Connection, model: &str) -> StoreResult<()> {
        PreferenceStore::set_string(conn, preferences::API_MODEL, model.trim())
    }

    pub fn cached_models(conn: &Connection) -> StoreResult<Vec<String>> {
        Ok(PreferenceStore::get_string_set(conn, preferences::API_MODELS)?
            .map(|set| set.into_iter().collect())
            .unwrap_or_default())
    }

    /// Model ids offered by the provider. The list is fetched once and cached;
    /// `refresh` drops the cache first. A failed fetch yields an empty list.
    pub async fn api_models(
        pool: &DbPool,
        client: &dyn CompletionClient,
        refresh: bool,
    ) -> StoreResult<Vec<String>> {
        {
            let conn = lock(pool);
            if refresh {
                PreferenceStore::remove(&conn, preferences::API_MODELS)?;
            } else {
                let cached = Self::cached_models(&conn)?;
                if !cached.is_empty() {
                    return Ok(cached);
                }
            }
        }

        let fetched: BTreeSet<String> = match client.list_models().await {
            Ok(models) => models.into_iter().collect(),
            Err(e) => {
                warn!("Failed to fetch model list: {}", e);
                return Ok(Vec::new());
            }
        };

        info!(count = fetched.len(), "fetched model list");
        if !fetched.is_empty() {
            let conn = lock(pool);
            PreferenceStore::set_string_set(&conn, preferences::API_MODELS, &fetched)?;
        }
        Ok(fetched.into_iter().collect())
    }
}
