use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    calculation::record,
    database::{self, table},
    declare::Market,
};

/// 外資持股表 `foreign_holdings` 的資料列
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct ForeignHolding {
    pub stock_id: i32,
    pub trade_date: NaiveDate,
    /// 發行股數
    pub total_shares: Option<i64>,
    /// 外資及陸資持有股數
    pub foreign_shares: Option<i64>,
    /// 外資及陸資持股比率(%)
    pub foreign_ratio: Option<Decimal>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct ForeignHoldingView {
    pub code: String,
    pub name: String,
    pub market: String,
    pub trade_date: NaiveDate,
    pub total_shares: Option<i64>,
    pub foreign_shares: Option<i64>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub foreign_ratio: Option<Decimal>,
}

impl ForeignHolding {
    pub fn to_record(&self, security_code: &str) -> record::ForeignHolding {
        record::ForeignHolding {
            security_code: security_code.to_string(),
            trade_date: self.trade_date,
            total_shares: self.total_shares,
            foreign_shares: self.foreign_shares,
            foreign_ratio: self.foreign_ratio,
        }
    }

    pub async fn upsert_batch(items: &[ForeignHolding]) -> Result<u64> {
        let unique = table::dedup_by_stock_date(items, |item| (item.stock_id, item.trade_date));
        let mut tx = database::get_tx().await?;
        let mut affected = 0;

        for chunk in unique.chunks(database::MAX_BIND_PARAMETERS / 5) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO foreign_holdings (stock_id, trade_date, total_shares, foreign_shares, foreign_ratio) ",
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.stock_id)
                    .push_bind(item.trade_date)
                    .push_bind(item.total_shares)
                    .push_bind(item.foreign_shares)
                    .push_bind(item.foreign_ratio.map(|r| r.round_dp(4)));
            });
            qb.push(
                r#"
ON CONFLICT (stock_id, trade_date) DO UPDATE SET
    total_shares = EXCLUDED.total_shares,
    foreign_shares = EXCLUDED.foreign_shares,
    foreign_ratio = EXCLUDED.foreign_ratio"#,
            );

            affected += qb
                .build()
                .execute(&mut *tx)
                .await
                .context(format!(
                    "Failed to ForeignHolding::upsert_batch({}) from database",
                    chunk.len()
                ))?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    pub async fn fetch_by_stock(stock_id: i32) -> Result<Vec<ForeignHolding>> {
        let sql = r#"
SELECT stock_id, trade_date, total_shares, foreign_shares, foreign_ratio
FROM foreign_holdings
WHERE stock_id = $1
ORDER BY trade_date"#;

        sqlx::query_as::<_, ForeignHolding>(sql)
            .bind(stock_id)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to ForeignHolding::fetch_by_stock({}) from database",
                stock_id
            ))
    }

    pub async fn fetch_last_trade_date() -> Result<Option<NaiveDate>> {
        sqlx::query_scalar("SELECT MAX(trade_date) FROM foreign_holdings")
            .fetch_one(database::get_connection())
            .await
            .context("Failed to ForeignHolding::fetch_last_trade_date() from database")
    }

    /// 指定日期的外資持股，依持股比率遞減
    pub async fn fetch_page(
        trade_date: NaiveDate,
        market: Option<Market>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<ForeignHoldingView>)> {
        let market = market.map(|m| m.code());
        let from = r#"
FROM foreign_holdings h
JOIN stocks s ON s.id = h.stock_id
WHERE h.trade_date = $1 AND ($2::text IS NULL OR s.market = $2)"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", from))
            .bind(trade_date)
            .bind(market)
            .fetch_one(database::get_connection())
            .await
            .context(format!("Failed to count foreign_holdings({})", trade_date))?;

        let sql = format!(
            r#"
SELECT s.code, s.name, s.market, h.trade_date, h.total_shares, h.foreign_shares, h.foreign_ratio
{}
ORDER BY h.foreign_ratio DESC NULLS LAST, s.code
LIMIT $3 OFFSET $4"#,
            from
        );
        let items = sqlx::query_as::<_, ForeignHoldingView>(&sql)
            .bind(trade_date)
            .bind(market)
            .bind(limit)
            .bind(offset)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to ForeignHolding::fetch_page({}) from database",
                trade_date
            ))?;

        Ok((total, items))
    }
}
