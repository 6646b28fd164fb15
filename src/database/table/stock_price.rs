use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    database::{self, table},
    declare::Market,
};

/// 每日收盤行情表 `stock_prices` 的資料列
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct StockPrice {
    pub stock_id: i32,
    pub trade_date: NaiveDate,
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    /// 成交股數
    pub volume: Option<i64>,
    /// 成交金額
    pub turnover: Option<i64>,
    /// 漲跌價差
    pub change_amount: Option<Decimal>,
    /// 漲跌幅(%)
    pub change_percent: Option<Decimal>,
    /// 成交筆數
    pub transactions: Option<i64>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct StockPriceView {
    pub code: String,
    pub name: String,
    pub market: String,
    pub trade_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub open: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub high: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub low: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub close: Option<Decimal>,
    pub volume: Option<i64>,
    pub turnover: Option<i64>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_amount: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_percent: Option<Decimal>,
    pub transactions: Option<i64>,
}

const VIEW_COLUMNS: &str = "s.code, s.name, s.market, p.trade_date, p.open, p.high, p.low, p.close, \
p.volume, p.turnover, p.change_amount, p.change_percent, p.transactions";

const FIELDS: usize = 11;

/// 漲跌幅 = 漲跌價差 / 前一日收盤價 * 100，前一日收盤價不大於 0 時無法計算
pub fn change_percent(close: Option<Decimal>, change: Option<Decimal>) -> Option<Decimal> {
    let close = close?;
    let change = change?;
    let previous = close - change;
    if previous <= Decimal::ZERO {
        return None;
    }

    Some((change / previous * Decimal::ONE_HUNDRED).round_dp(2))
}

impl StockPrice {
    pub async fn upsert_batch(items: &[StockPrice]) -> Result<u64> {
        let unique = table::dedup_by_stock_date(items, |item| (item.stock_id, item.trade_date));
        let mut tx = database::get_tx().await?;
        let mut affected = 0;

        for chunk in unique.chunks(database::MAX_BIND_PARAMETERS / FIELDS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"INSERT INTO stock_prices (stock_id, trade_date, open, high, low, close,
volume, turnover, change_amount, change_percent, transactions) "#,
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.stock_id)
                    .push_bind(item.trade_date)
                    .push_bind(item.open)
                    .push_bind(item.high)
                    .push_bind(item.low)
                    .push_bind(item.close)
                    .push_bind(item.volume)
                    .push_bind(item.turnover)
                    .push_bind(item.change_amount)
                    .push_bind(item.change_percent)
                    .push_bind(item.transactions);
            });
            qb.push(
                r#"
ON CONFLICT (stock_id, trade_date) DO UPDATE SET
    open = EXCLUDED.open,
    high = EXCLUDED.high,
    low = EXCLUDED.low,
    close = EXCLUDED.close,
    volume = EXCLUDED.volume,
    turnover = EXCLUDED.turnover,
    change_amount = EXCLUDED.change_amount,
    change_percent = EXCLUDED.change_percent,
    transactions = EXCLUDED.transactions"#,
            );

            affected += qb
                .build()
                .execute(&mut *tx)
                .await
                .context(format!(
                    "Failed to StockPrice::upsert_batch({}) from database",
                    chunk.len()
                ))?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    pub async fn fetch_last_trade_date() -> Result<Option<NaiveDate>> {
        sqlx::query_scalar("SELECT MAX(trade_date) FROM stock_prices")
            .fetch_one(database::get_connection())
            .await
            .context("Failed to StockPrice::fetch_last_trade_date() from database")
    }

    /// 單一股票最近 `limit` 筆，依日期遞增
    pub async fn fetch_history(stock_id: i32, limit: i64) -> Result<Vec<StockPriceView>> {
        let sql = format!(
            r#"
SELECT * FROM (
    SELECT {}
    FROM stock_prices p
    JOIN stocks s ON s.id = p.stock_id
    WHERE p.stock_id = $1
    ORDER BY p.trade_date DESC
    LIMIT $2
) latest
ORDER BY trade_date"#,
            VIEW_COLUMNS
        );

        sqlx::query_as::<_, StockPriceView>(&sql)
            .bind(stock_id)
            .bind(limit)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to StockPrice::fetch_history({}) from database",
                stock_id
            ))
    }

    /// 指定日期的行情，依股票代號排序
    pub async fn fetch_page(
        trade_date: NaiveDate,
        market: Option<Market>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<StockPriceView>)> {
        let market = market.map(|m| m.code());
        let from = r#"
FROM stock_prices p
JOIN stocks s ON s.id = p.stock_id
WHERE p.trade_date = $1 AND ($2::text IS NULL OR s.market = $2)"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", from))
            .bind(trade_date)
            .bind(market)
            .fetch_one(database::get_connection())
            .await
            .context(format!("Failed to count stock_prices({})", trade_date))?;

        let sql = format!(
            "SELECT {} {} ORDER BY s.code LIMIT $3 OFFSET $4",
            VIEW_COLUMNS, from
        );
        let items = sqlx::query_as::<_, StockPriceView>(&sql)
            .bind(trade_date)
            .bind(market)
            .bind(limit)
            .bind(offset)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to StockPrice::fetch_page({}) from database",
                trade_date
            ))?;

        Ok((total, items))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::logging;

    #[test]
    fn test_change_percent() {
        assert_eq!(change_percent(Some(dec!(110)), Some(dec!(10))), Some(dec!(10.00)));
        assert_eq!(change_percent(Some(dec!(95)), Some(dec!(-5))), Some(dec!(-5.00)));
        assert_eq!(change_percent(Some(dec!(5)), Some(dec!(5))), None);
        assert_eq!(change_percent(None, Some(dec!(1))), None);
        assert_eq!(change_percent(Some(dec!(10)), None), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_fetch_last_trade_date() {
        dotenv::dotenv().ok();
        match StockPrice::fetch_last_trade_date().await {
            Ok(date) => logging::debug_file_async(format!("last:{:?}", date)),
            Err(why) => logging::error_file_async(format!("{:?}", why)),
        }
    }
}
