use tracing::warn;

use super::core::Database;
use crate::TARGET_DB;

/// Settings rows created on startup when absent. Operators tune these
/// through the external CRUD layer; the core only reads them.
pub const BASE_SETTINGS: &[(&str, &str)] = &[
    ("poll_interval", "300"),
    ("stats_interval", "900"),
    ("correlation_window", "10"),
    ("fetch_limit", "100"),
    ("keep_media", "true"),
    ("media_max_bytes", "52428800"),
];

impl Database {
    pub(crate) async fn ensure_base_settings(&self) -> Result<(), sqlx::Error> {
        for (code, value) in BASE_SETTINGS {
            sqlx::query(
                "INSERT INTO settings (code, value) VALUES (?1, ?2) ON CONFLICT (code) DO NOTHING",
            )
            .bind(code)
            .bind(value)
            .execute(self.pool())
            .await?;
        }
        Ok(())
    }

    pub async fn setting_str(&self, code: &str) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE code = ?1")
            .bind(code)
            .fetch_optional(self.pool())
            .await
    }

    pub async fn setting_int(&self, code: &str, default: i64) -> Result<i64, sqlx::Error> {
        let value = self.setting_str(code).await?;
        Ok(match value {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(target: TARGET_DB, "Setting '{}' has non-numeric value '{}', using {}", code, raw, default);
                default
            }),
            None => default,
        })
    }

    pub async fn setting_bool(&self, code: &str, default: bool) -> Result<bool, sqlx::Error> {
        let value = self.setting_str(code).await?;
        Ok(match value {
            Some(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
            None => default,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn base_settings_are_seeded_once() {
        let db = Database::memory().await;
        assert_eq!(db.setting_int("poll_interval", 0).await.unwrap(), 300);
        assert_eq!(db.setting_int("correlation_window", 0).await.unwrap(), 10);

        // Re-running the seeding never overwrites operator-edited values.
        sqlx::query("UPDATE settings SET value = '60' WHERE code = 'poll_interval'")
            .execute(db.pool())
            .await
            .unwrap();
        db.ensure_base_settings().await.unwrap();
        assert_eq!(db.setting_int("poll_interval", 0).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn typed_getters_fall_back_on_missing_or_bad_values() {
        let db = Database::memory().await;
        assert_eq!(db.setting_int("no_such_setting", 7).await.unwrap(), 7);
        assert!(db.setting_bool("no_such_setting", true).await.unwrap());

        sqlx::query("INSERT INTO settings (code, value) VALUES ('broken', 'abc')")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(db.setting_int("broken", 42).await.unwrap(), 42);
        assert!(!db.setting_bool("broken", true).await.unwrap());

        assert!(db.setting_bool("keep_media", false).await.unwrap());
    }
}
