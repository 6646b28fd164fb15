use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{calculation::record::Security, database, declare::Market};

/// 股票基本資料表 `stocks` 的資料列
#[derive(sqlx::FromRow, Serialize, Debug, Clone, PartialEq)]
pub struct Stock {
    pub id: i32,
    /// 股票代號
    pub code: String,
    pub name: String,
    /// TWSE 或 TPEX
    pub market: String,
    /// 發行股數
    pub total_shares: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 抓取資料時觀察到的股票，用來新增或更新 `stocks`
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedStock {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub total_shares: Option<i64>,
}

const COLUMNS: &str = "id, code, name, market, total_shares, is_active, created_at, updated_at";

impl Stock {
    pub fn to_security(&self) -> Option<Security> {
        Some(Security {
            code: self.code.to_string(),
            name: self.name.to_string(),
            market: self.market.parse::<Market>().ok()?,
            total_shares: self.total_shares,
            is_active: self.is_active,
        })
    }

    /// 取得所有股票
    pub async fn fetch() -> Result<Vec<Stock>> {
        let sql = format!("SELECT {} FROM stocks ORDER BY code", COLUMNS);
        sqlx::query_as::<_, Stock>(&sql)
            .fetch_all(database::get_connection())
            .await
            .context("Failed to Stock::fetch() from database")
    }

    /// 取得至少有一筆法人買賣超資料的股票
    pub async fn fetch_with_flows() -> Result<Vec<Stock>> {
        let sql = format!(
            r#"
SELECT {}
FROM stocks s
WHERE EXISTS (SELECT 1 FROM institutional_flows f WHERE f.stock_id = s.id)
ORDER BY code"#,
            COLUMNS
        );
        sqlx::query_as::<_, Stock>(&sql)
            .fetch_all(database::get_connection())
            .await
            .context("Failed to Stock::fetch_with_flows() from database")
    }

    pub async fn fetch_by_code(code: &str) -> Result<Option<Stock>> {
        let sql = format!("SELECT {} FROM stocks WHERE code = $1", COLUMNS);
        sqlx::query_as::<_, Stock>(&sql)
            .bind(code)
            .fetch_optional(database::get_connection())
            .await
            .context(format!("Failed to Stock::fetch_by_code({}) from database", code))
    }

    /// 依市場與關鍵字(代號或名稱)分頁查詢，回傳 (總筆數, 資料)
    pub async fn list(
        market: Option<Market>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<Stock>)> {
        let market = market.map(|m| m.code());
        let pattern = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s));
        let filter = r#"
WHERE ($1::text IS NULL OR market = $1)
  AND ($2::text IS NULL OR code ILIKE $2 OR name ILIKE $2)"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM stocks {}", filter))
            .bind(market)
            .bind(&pattern)
            .fetch_one(database::get_connection())
            .await
            .context("Failed to Stock::list() count from database")?;

        let sql = format!(
            "SELECT {} FROM stocks {} ORDER BY code LIMIT $3 OFFSET $4",
            COLUMNS, filter
        );
        let items = sqlx::query_as::<_, Stock>(&sql)
            .bind(market)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(database::get_connection())
            .await
            .context("Failed to Stock::list() from database")?;

        Ok((total, items))
    }

    /// 新增或更新股票，名稱為空或發行股數缺少時保留原值
    pub async fn upsert_many(observed: &[ObservedStock]) -> Result<Vec<Stock>> {
        let mut unique: HashMap<&str, &ObservedStock> = HashMap::with_capacity(observed.len());
        for item in observed {
            match unique.get_mut(item.code.as_str()) {
                Some(existing) => {
                    if item.total_shares.is_some() || existing.total_shares.is_none() {
                        *existing = item;
                    }
                }
                None => {
                    unique.insert(item.code.as_str(), item);
                }
            }
        }

        // 固定寫入順序，避免並行 upsert 時互相鎖住
        let mut items: Vec<&ObservedStock> = unique.into_values().collect();
        items.sort_by(|a, b| a.code.cmp(&b.code));
        let mut result = Vec::with_capacity(items.len());
        let per_chunk = database::MAX_BIND_PARAMETERS / 4;

        for chunk in items.chunks(per_chunk) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO stocks (code, name, market, total_shares) ");
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(&item.code)
                    .push_bind(&item.name)
                    .push_bind(item.market.code())
                    .push_bind(item.total_shares);
            });
            qb.push(
                r#"
ON CONFLICT (code) DO UPDATE SET
    name = CASE WHEN EXCLUDED.name <> '' THEN EXCLUDED.name ELSE stocks.name END,
    market = EXCLUDED.market,
    total_shares = COALESCE(NULLIF(EXCLUDED.total_shares, 0), stocks.total_shares),
    is_active = TRUE,
    updated_at = NOW()
RETURNING "#,
            );
            qb.push(COLUMNS);

            let stocks = qb
                .build_query_as::<Stock>()
                .fetch_all(database::get_connection())
                .await
                .context(format!("Failed to Stock::upsert_many({}) from database", chunk.len()))?;
            result.extend(stocks);
        }

        Ok(result)
    }
}
