use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    database::{self, table},
    declare::BrokerSide,
};

/// 券商分點進出表 `broker_trades` 的資料列
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct BrokerTrade {
    pub stock_id: i32,
    pub trade_date: NaiveDate,
    pub broker_name: String,
    pub broker_id: Option<String>,
    pub buy_vol: i64,
    pub sell_vol: i64,
    pub net_vol: i64,
    pub pct: Option<Decimal>,
    pub rank: i32,
    /// buy 或 sell
    pub side: String,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct BrokerTradeView {
    pub code: String,
    pub name: String,
    pub trade_date: NaiveDate,
    pub broker_name: String,
    pub broker_id: Option<String>,
    pub buy_vol: i64,
    pub sell_vol: i64,
    pub net_vol: i64,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub pct: Option<Decimal>,
    pub rank: i32,
    pub side: String,
}

/// 單日各券商分點的合計
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct BrokerRankingView {
    pub broker_name: String,
    pub total_buy: i64,
    pub total_sell: i64,
    pub total_net: i64,
    pub stock_count: i64,
}

/// 查詢條件，`None` 表示不過濾
#[derive(Debug, Default, Clone)]
pub struct BrokerTradeFilter {
    pub stock_code: Option<String>,
    /// 部分比對且不分大小寫
    pub broker_name: Option<String>,
    pub side: Option<BrokerSide>,
}

const VIEW_COLUMNS: &str = "s.code, s.name, b.trade_date, b.broker_name, b.broker_id, \
b.buy_vol, b.sell_vol, b.net_vol, b.pct, b.rank, b.side";

const FIELDS: usize = 10;

/// ILIKE 的部分比對樣式，跳脫使用者輸入中的萬用字元
pub(crate) fn like_pattern(keyword: &str) -> String {
    let mut escaped = String::with_capacity(keyword.len() + 2);
    escaped.push('%');
    for c in keyword.trim().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');

    escaped
}

impl BrokerTrade {
    /// 以 (stock_id, trade_date, side, broker_name) upsert
    pub async fn upsert_batch(items: &[BrokerTrade]) -> Result<u64> {
        let unique = table::dedup_by_key(items, |item| {
            (
                item.stock_id,
                item.trade_date,
                item.side.to_string(),
                item.broker_name.to_string(),
            )
        });
        let mut tx = database::get_tx().await?;
        let mut affected = 0;

        for chunk in unique.chunks(database::MAX_BIND_PARAMETERS / FIELDS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"INSERT INTO broker_trades (stock_id, trade_date, broker_name, broker_id,
buy_vol, sell_vol, net_vol, pct, rank, side) "#,
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.stock_id)
                    .push_bind(item.trade_date)
                    .push_bind(&item.broker_name)
                    .push_bind(&item.broker_id)
                    .push_bind(item.buy_vol)
                    .push_bind(item.sell_vol)
                    .push_bind(item.net_vol)
                    .push_bind(item.pct)
                    .push_bind(item.rank)
                    .push_bind(&item.side);
            });
            qb.push(
                r#"
ON CONFLICT (stock_id, trade_date, side, broker_name) DO UPDATE SET
    broker_id = EXCLUDED.broker_id,
    buy_vol = EXCLUDED.buy_vol,
    sell_vol = EXCLUDED.sell_vol,
    net_vol = EXCLUDED.net_vol,
    pct = EXCLUDED.pct,
    rank = EXCLUDED.rank"#,
            );

            affected += qb
                .build()
                .execute(&mut *tx)
                .await
                .context(format!(
                    "Failed to BrokerTrade::upsert_batch({}) from database",
                    chunk.len()
                ))?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    pub async fn fetch_last_trade_date() -> Result<Option<NaiveDate>> {
        sqlx::query_scalar("SELECT MAX(trade_date) FROM broker_trades")
            .fetch_one(database::get_connection())
            .await
            .context("Failed to BrokerTrade::fetch_last_trade_date() from database")
    }

    /// 指定日期的分點進出，依名次排序
    pub async fn fetch_page(
        trade_date: NaiveDate,
        filter: &BrokerTradeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<BrokerTradeView>)> {
        let broker_name = filter.broker_name.as_deref().map(like_pattern);
        let side = filter.side.map(|s| s.code());
        let from = r#"
FROM broker_trades b
JOIN stocks s ON s.id = b.stock_id
WHERE b.trade_date = $1
  AND ($2::text IS NULL OR s.code = $2)
  AND ($3::text IS NULL OR b.broker_name ILIKE $3)
  AND ($4::text IS NULL OR b.side = $4)"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", from))
            .bind(trade_date)
            .bind(&filter.stock_code)
            .bind(&broker_name)
            .bind(side)
            .fetch_one(database::get_connection())
            .await
            .context(format!("Failed to count broker_trades({})", trade_date))?;

        let sql = format!(
            "SELECT {} {} ORDER BY b.rank, s.code, b.side LIMIT $5 OFFSET $6",
            VIEW_COLUMNS, from
        );
        let items = sqlx::query_as::<_, BrokerTradeView>(&sql)
            .bind(trade_date)
            .bind(&filter.stock_code)
            .bind(&broker_name)
            .bind(side)
            .bind(limit)
            .bind(offset)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to BrokerTrade::fetch_page({}) from database",
                trade_date
            ))?;

        Ok((total, items))
    }

    /// 指定日期各分點的買賣合計，依買賣超絕對值合計遞減
    pub async fn fetch_ranking(trade_date: NaiveDate, limit: i64) -> Result<Vec<BrokerRankingView>> {
        let sql = r#"
SELECT b.broker_name,
       SUM(b.buy_vol)::BIGINT AS total_buy,
       SUM(b.sell_vol)::BIGINT AS total_sell,
       SUM(b.net_vol)::BIGINT AS total_net,
       COUNT(DISTINCT b.stock_id) AS stock_count
FROM broker_trades b
WHERE b.trade_date = $1
GROUP BY b.broker_name
ORDER BY SUM(ABS(b.net_vol)) DESC, b.broker_name
LIMIT $2"#;

        sqlx::query_as::<_, BrokerRankingView>(sql)
            .bind(trade_date)
            .bind(limit)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to BrokerTrade::fetch_ranking({}) from database",
                trade_date
            ))
    }

    /// 單一券商(部分比對)的進出紀錄，日期新到舊
    pub async fn fetch_history(
        broker_name: &str,
        stock_code: Option<&str>,
        limit: i64,
    ) -> Result<Vec<BrokerTradeView>> {
        let sql = format!(
            r#"
SELECT {}
FROM broker_trades b
JOIN stocks s ON s.id = b.stock_id
WHERE b.broker_name ILIKE $1 AND ($2::text IS NULL OR s.code = $2)
ORDER BY b.trade_date DESC, s.code
LIMIT $3"#,
            VIEW_COLUMNS
        );

        sqlx::query_as::<_, BrokerTradeView>(&sql)
            .bind(like_pattern(broker_name))
            .bind(stock_code)
            .bind(limit)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to BrokerTrade::fetch_history({}) from database",
                broker_name
            ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("富邦"), "%富邦%");
        assert_eq!(like_pattern(" 50%_a "), "%50\\%\\_a%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[tokio::test]
    #[ignore]
    async fn test_fetch_ranking() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match BrokerTrade::fetch_ranking(date, 10).await {
            Ok(items) => logging::debug_file_async(format!("ranking:{:?}", items)),
            Err(why) => logging::error_file_async(format!("{:?}", why)),
        }
    }
}
