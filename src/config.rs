use std::{env, path::PathBuf, str::FromStr};

use anyhow::Result;
use config::{Config as config_config, File as config_file};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::logging;

const CONFIG_PATH: &str = "app.json";

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct App {
    #[serde(default)]
    pub postgresql: PostgreSQL,
    #[serde(default)]
    pub system: System,
    #[serde(default)]
    pub etl: Etl,
    #[serde(default)]
    pub broker: Broker,
}

const SYSTEM_HTTP_PORT: &str = "SYSTEM_HTTP_PORT";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct System {
    /// REST API 使用的 port，0 表示不啟動
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for System {
    fn default() -> Self {
        System {
            http_port: default_http_port(),
        }
    }
}

fn default_http_port() -> u16 {
    8000
}

const ETL_BASELINE_PATH: &str = "ETL_BASELINE_PATH";
const ETL_INITIAL_BACKFILL_DAYS: &str = "ETL_INITIAL_BACKFILL_DAYS";
const ETL_CRON: &str = "ETL_CRON";
const ETL_CONCURRENCY: &str = "ETL_CONCURRENCY";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Etl {
    /// 投信、自營商基準持股的 CSV 檔
    #[serde(default = "default_baseline_path")]
    pub baseline_path: String,
    /// 資料庫沒有任何資料時，往回抓取的日曆天數
    #[serde(default = "default_initial_backfill_days")]
    pub initial_backfill_days: u64,
    /// 每日排程(UTC)，空字串表示不排程
    #[serde(default = "default_cron")]
    pub cron: String,
    /// 同時抓取的日期數
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for Etl {
    fn default() -> Self {
        Etl {
            baseline_path: default_baseline_path(),
            initial_backfill_days: default_initial_backfill_days(),
            cron: default_cron(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_baseline_path() -> String {
    "data/inst_baseline.csv".to_string()
}

fn default_initial_backfill_days() -> u64 {
    60
}

fn default_cron() -> String {
    // 週一到週五 18:30 (台北)
    "0 30 10 * * Mon-Fri".to_string()
}

fn default_concurrency() -> usize {
    2
}

const BROKER_CODES: &str = "BROKER_CODES";
const BROKER_CRON: &str = "BROKER_CRON";
const BROKER_INITIAL_BACKFILL_DAYS: &str = "BROKER_INITIAL_BACKFILL_DAYS";
const BROKER_DELAY_MS: &str = "BROKER_DELAY_MS";

/// 券商分點進出的抓取設定
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Broker {
    /// 要追蹤的股票代號
    #[serde(default = "default_broker_codes")]
    pub codes: Vec<String>,
    /// 每日排程(UTC)，空字串表示不排程
    #[serde(default = "default_broker_cron")]
    pub cron: String,
    /// 資料庫沒有任何資料時，往回抓取的日曆天數
    #[serde(default = "default_broker_initial_backfill_days")]
    pub initial_backfill_days: u64,
    /// 每次請求之間的間隔(毫秒)
    #[serde(default = "default_broker_delay_ms")]
    pub delay_ms: u64,
}

impl Default for Broker {
    fn default() -> Self {
        Broker {
            codes: default_broker_codes(),
            cron: default_broker_cron(),
            initial_backfill_days: default_broker_initial_backfill_days(),
            delay_ms: default_broker_delay_ms(),
        }
    }
}

fn default_broker_codes() -> Vec<String> {
    [
        "2330", "2317", "2454", "2412", "2308", "2881", "2882", "2891", "2886", "2884", "1301",
        "1303", "2303", "2382", "3008", "2357", "2603", "2609", "2615", "3711",
    ]
    .iter()
    .map(|code| code.to_string())
    .collect()
}

fn default_broker_cron() -> String {
    // 週一到週五 19:00 (台北)，在法人持股比例 ETL 之後
    "0 0 11 * * Mon-Fri".to_string()
}

fn default_broker_initial_backfill_days() -> u64 {
    5
}

fn default_broker_delay_ms() -> u64 {
    1500
}

/// 逗號分隔的股票代號，忽略空白項目
fn parse_codes(codes: &str) -> Vec<String> {
    codes
        .split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
        .collect()
}

const POSTGRESQL_HOST: &str = "POSTGRESQL_HOST";
const POSTGRESQL_PORT: &str = "POSTGRESQL_PORT";
const POSTGRESQL_USER: &str = "POSTGRESQL_USER";
const POSTGRESQL_PASSWORD: &str = "POSTGRESQL_PASSWORD";
const POSTGRESQL_DB: &str = "POSTGRESQL_DB";

#[derive(Serialize, Deserialize, Default, Debug, Clone)]
pub struct PostgreSQL {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: String,
}

pub static SETTINGS: Lazy<App> = Lazy::new(|| {
    App::get().unwrap_or_else(|why| {
        logging::error_console(format!("Failed to load {} because {:?}", CONFIG_PATH, why));
        App::from_env()
    })
});

impl App {
    fn get() -> Result<Self> {
        let config_path = config_path();
        if config_path.exists() {
            let config: App = config_config::builder()
                .add_source(config_file::from(config_path))
                .build()?
                .try_deserialize()?;
            return Ok(config.override_with_env());
        }

        Ok(App::from_env())
    }

    /// 從 env 中讀取設定值
    fn from_env() -> Self {
        App {
            postgresql: PostgreSQL {
                host: "localhost".to_string(),
                port: 5432,
                ..Default::default()
            },
            ..Default::default()
        }
        .override_with_env()
    }

    /// 將來至於 env 的設定值覆蓋掉 json 上的設定值
    fn override_with_env(mut self) -> Self {
        if let Ok(host) = env::var(POSTGRESQL_HOST) {
            self.postgresql.host = host;
        }

        if let Ok(port) = env::var(POSTGRESQL_PORT) {
            self.postgresql.port = i32::from_str(&port).unwrap_or(5432);
        }

        if let Ok(user) = env::var(POSTGRESQL_USER) {
            self.postgresql.user = user;
        }

        if let Ok(password) = env::var(POSTGRESQL_PASSWORD) {
            self.postgresql.password = password;
        }

        if let Ok(db) = env::var(POSTGRESQL_DB) {
            self.postgresql.db = db;
        }

        if let Ok(port) = env::var(SYSTEM_HTTP_PORT) {
            self.system.http_port = port.parse::<u16>().unwrap_or(self.system.http_port);
        }

        if let Ok(path) = env::var(ETL_BASELINE_PATH) {
            self.etl.baseline_path = path;
        }

        if let Ok(days) = env::var(ETL_INITIAL_BACKFILL_DAYS) {
            self.etl.initial_backfill_days =
                days.parse::<u64>().unwrap_or(self.etl.initial_backfill_days);
        }

        if let Ok(cron) = env::var(ETL_CRON) {
            self.etl.cron = cron;
        }

        if let Ok(concurrency) = env::var(ETL_CONCURRENCY) {
            self.etl.concurrency = concurrency
                .parse::<usize>()
                .ok()
                .filter(|c| *c > 0)
                .unwrap_or(self.etl.concurrency);
        }

        if let Ok(codes) = env::var(BROKER_CODES) {
            let codes = parse_codes(&codes);
            if !codes.is_empty() {
                self.broker.codes = codes;
            }
        }

        if let Ok(cron) = env::var(BROKER_CRON) {
            self.broker.cron = cron;
        }

        if let Ok(days) = env::var(BROKER_INITIAL_BACKFILL_DAYS) {
            self.broker.initial_backfill_days =
                days.parse::<u64>().unwrap_or(self.broker.initial_backfill_days);
        }

        if let Ok(delay) = env::var(BROKER_DELAY_MS) {
            self.broker.delay_ms = delay.parse::<u64>().unwrap_or(self.broker.delay_ms);
        }

        self
    }
}

/// 回傳設定檔的路徑
fn config_path() -> PathBuf {
    PathBuf::from(CONFIG_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_json() {
        let app: App = config_config::builder()
            .add_source(config::File::from_str(
                r#"{"postgresql": {"host": "db", "port": 5433}}"#,
                config::FileFormat::Json,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(app.postgresql.host, "db");
        assert_eq!(app.postgresql.port, 5433);
        assert_eq!(app.system.http_port, 8000);
        assert_eq!(app.etl.baseline_path, "data/inst_baseline.csv");
        assert_eq!(app.etl.initial_backfill_days, 60);
        assert_eq!(app.etl.concurrency, 2);
        assert_eq!(app.broker.codes.len(), 20);
        assert_eq!(app.broker.initial_backfill_days, 5);
    }

    #[test]
    fn test_parse_codes() {
        assert_eq!(parse_codes(" 2330, 2317 ,,6488"), vec!["2330", "2317", "6488"]);
        assert!(parse_codes(" , ").is_empty());
    }

    #[test]
    #[ignore]
    fn test_load() {
        dotenv::dotenv().ok();
        logging::debug_file_async(format!("SETTINGS: {:?}", *SETTINGS));
    }
}
