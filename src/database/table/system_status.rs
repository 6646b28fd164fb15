use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::database;

/// ETL 狀態使用的 key
pub const ETL_STATUS: &str = "etl_status";

/// 券商分點 ETL 狀態使用的 key
pub const BROKER_STATUS: &str = "broker_status";

pub const RUNNING: &str = "running";
pub const COMPLETED: &str = "completed";
pub const ERROR: &str = "error";

/// 排程狀態表 `system_status` 的資料列
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct SystemStatus {
    pub status_key: String,
    pub status_value: String,
    pub message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SystemStatus {
    /// 開始執行，清除上次的完成時間與訊息
    pub async fn mark_running(key: &str) -> Result<()> {
        let sql = r#"
INSERT INTO system_status (status_key, status_value, message, started_at, completed_at, updated_at)
VALUES ($1, $2, NULL, NOW(), NULL, NOW())
ON CONFLICT (status_key) DO UPDATE SET
    status_value = EXCLUDED.status_value,
    message = NULL,
    started_at = NOW(),
    completed_at = NULL,
    updated_at = NOW()"#;

        sqlx::query(sql)
            .bind(key)
            .bind(RUNNING)
            .execute(database::get_connection())
            .await
            .context(format!("Failed to SystemStatus::mark_running({}) from database", key))?;

        Ok(())
    }

    pub async fn mark_completed(key: &str, message: &str) -> Result<()> {
        Self::finish(key, COMPLETED, message).await
    }

    pub async fn mark_error(key: &str, message: &str) -> Result<()> {
        Self::finish(key, ERROR, message).await
    }

    async fn finish(key: &str, value: &str, message: &str) -> Result<()> {
        let sql = r#"
INSERT INTO system_status (status_key, status_value, message, completed_at, updated_at)
VALUES ($1, $2, $3, NOW(), NOW())
ON CONFLICT (status_key) DO UPDATE SET
    status_value = EXCLUDED.status_value,
    message = EXCLUDED.message,
    completed_at = NOW(),
    updated_at = NOW()"#;

        sqlx::query(sql)
            .bind(key)
            .bind(value)
            .bind(message)
            .execute(database::get_connection())
            .await
            .context(format!(
                "Failed to SystemStatus::finish({}, {}) from database",
                key, value
            ))?;

        Ok(())
    }

    pub async fn fetch(key: &str) -> Result<Option<SystemStatus>> {
        let sql = r#"
SELECT status_key, status_value, message, started_at, completed_at, updated_at
FROM system_status
WHERE status_key = $1"#;

        sqlx::query_as::<_, SystemStatus>(sql)
            .bind(key)
            .fetch_optional(database::get_connection())
            .await
            .context(format!("Failed to SystemStatus::fetch({}) from database", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    #[tokio::test]
    #[ignore]
    async fn test_mark_running_then_completed() {
        dotenv::dotenv().ok();
        SystemStatus::mark_running("test_status").await.unwrap();
        SystemStatus::mark_completed("test_status", "ok").await.unwrap();

        let status = SystemStatus::fetch("test_status").await.unwrap().unwrap();
        logging::debug_file_async(format!("status:{:?}", status));
        assert_eq!(status.status_value, COMPLETED);
        assert!(status.completed_at.is_some());
    }
}
