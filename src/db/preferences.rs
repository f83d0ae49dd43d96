use std::collections::BTreeSet;

use duckdb::{params, Connection};

use crate::db::error::{StoreError, StoreResult};

pub const THEME: &str = "theme";
pub const API_MODEL: &str = "api_model";
pub const API_MODELS: &str = "api_models";
pub const LAST_TRY: &str = "last_try";
pub const TRIES: &str = "tries";

/// Key-value settings kept alongside the chat history.
///
/// Every value is stored as text. Numbers are written in decimal and string
/// sets as a JSON array.
pub struct PreferenceStore;

impl PreferenceStore {
    pub fn get_string(conn: &Connection, key: &str) -> StoreResult<Option<String>> {
        let result = conn.query_row(
            "SELECT value FROM preferences WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_string(conn: &Connection, key: &str, value: &str) -> StoreResult<()> {
        conn.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_i64(conn: &Connection, key: &str) -> StoreResult<Option<i64>> {
        Self::get_string(conn, key)?
            .map(|raw| {
                raw.parse::<i64>()
                    .map_err(|e| StoreError::Corrupt(format!("preference {}={:?}: {}", key, raw, e)))
            })
            .transpose()
    }

    pub fn set_i64(conn: &Connection, key: &str, value: i64) -> StoreResult<()> {
        Self::set_string(conn, key, &value.to_string())
    }

    pub fn get_string_set(conn: &Connection, key: &str) -> StoreResult<Option<BTreeSet<String>>> {
        Self::get_string(conn, key)?
            .map(|raw| {
                serde_json::from_str::<BTreeSet<String>>(&raw)
                    .map_err(|e| StoreError::Corrupt(format!("preference {}: {}", key, e)))
            })
            .transpose()
    }

    pub fn set_string_set(conn: &Connection, key: &str, values: &BTreeSet<String>) -> StoreResult<()> {
        let encoded = serde_json::to_string(values)
            .map_err(|e| StoreError::Corrupt(format!("preference {}: {}", key, e)))?;
        Self::set_string(conn, key, &encoded)
    }

    pub fn remove(conn: &Connection, key: &str) -> StoreResult<()> {
        conn.execute("DELETE FROM preferences WHERE key = ?", params![key])?;
        Ok(())
    }
}
