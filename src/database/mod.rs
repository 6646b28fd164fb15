use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};

use crate::config;

pub mod store;
pub mod table;

static POSTGRES: Lazy<Arc<OnceLock<PostgresSQL>>> = Lazy::new(|| Arc::new(OnceLock::new()));

/// 建表語法，啟動時執行，皆為 IF NOT EXISTS
const SCHEMA: &str = include_str!("../../sql/schema.sql");

/// PostgreSQL 單一語句的參數上限為 65535，批次寫入時依欄位數切分
pub(crate) const MAX_BIND_PARAMETERS: usize = 65_535;

/// PostgreSQL 連線池封裝。
pub struct PostgresSQL {
    /// SQLx PostgreSQL 連線池實例。
    pub pool: PgPool,
}

impl PostgresSQL {
    /// 建立 PostgreSQL 連線池。
    ///
    /// 連線參數來自 `config::SETTINGS.postgresql`，採 lazy 連線，第一次查詢時才真正建立。
    pub fn new() -> Result<PostgresSQL> {
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}?application_name=institutional_tracker",
            config::SETTINGS.postgresql.user,
            config::SETTINGS.postgresql.password,
            config::SETTINGS.postgresql.host,
            config::SETTINGS.postgresql.port,
            config::SETTINGS.postgresql.db
        );
        let db = PgPoolOptions::new()
            .max_lifetime(Some(Duration::from_secs(1800))) // 30 分鐘
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Some(Duration::from_secs(600))) // 10 分鐘
            .connect_lazy(&database_url)
            .with_context(|| {
                format!(
                    "wrong database URL postgres://{}@{}:{}/{}",
                    config::SETTINGS.postgresql.user,
                    config::SETTINGS.postgresql.host,
                    config::SETTINGS.postgresql.port,
                    config::SETTINGS.postgresql.db
                )
            })?;

        Ok(Self { pool: db })
    }

    /// 取得連線池參考。
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 從目前連線池建立一筆 transaction。
    pub async fn tx(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool().begin().await?)
    }
}

/// 建立全域連線池，必須在任何查詢之前呼叫一次
pub fn init() -> Result<()> {
    if POSTGRES.get().is_none() {
        let pg = PostgresSQL::new()?;
        let _ = POSTGRES.set(pg);
    }

    Ok(())
}

fn get_postgresql() -> &'static PostgresSQL {
    POSTGRES.get_or_init(|| match PostgresSQL::new() {
        Ok(pg) => pg,
        Err(why) => panic!("{:?}", why),
    })
}

/// 取得全域 PostgreSQL 連線池。
pub fn get_connection() -> &'static PgPool {
    get_postgresql().pool()
}

/// 從全域 PostgreSQL 連線池建立 transaction。
pub async fn get_tx() -> Result<Transaction<'static, Postgres>> {
    get_postgresql().tx().await
}

/// 建立資料表
pub async fn migrate() -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(get_connection())
        .await
        .context("Failed to apply sql/schema.sql")?;

    Ok(())
}
