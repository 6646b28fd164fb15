use anyhow::{Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder, Transaction};

use crate::{
    calculation::record::{self, Security, WindowChanges},
    database,
    declare::Market,
};

/// 法人持股比例表 `institutional_ratios` 的資料列
#[derive(sqlx::FromRow, Debug, Clone, PartialEq)]
pub struct InstitutionalRatio {
    pub stock_id: i32,
    pub trade_date: NaiveDate,
    pub foreign_ratio: Option<Decimal>,
    pub trust_ratio_est: Option<Decimal>,
    pub dealer_ratio_est: Option<Decimal>,
    pub three_inst_ratio_est: Option<Decimal>,
    pub trust_shares_est: Option<i64>,
    pub dealer_shares_est: Option<i64>,
    pub change_5d: Option<Decimal>,
    pub change_20d: Option<Decimal>,
    pub change_60d: Option<Decimal>,
    pub change_120d: Option<Decimal>,
}

/// API 使用，含股票代號與名稱
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct InstitutionalRatioView {
    pub code: String,
    pub name: String,
    pub market: String,
    pub trade_date: NaiveDate,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub foreign_ratio: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub trust_ratio_est: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub dealer_ratio_est: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub three_inst_ratio_est: Option<Decimal>,
    pub trust_shares_est: Option<i64>,
    pub dealer_shares_est: Option<i64>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_5d: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_20d: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_60d: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub change_120d: Option<Decimal>,
}

/// 排行使用，股票基本資料加上當日比例
#[derive(sqlx::FromRow, Debug, Clone)]
struct RankingRow {
    code: String,
    name: String,
    market: String,
    total_shares: Option<i64>,
    is_active: bool,
    #[sqlx(flatten)]
    ratio: InstitutionalRatio,
}

const COLUMNS: &str = "r.stock_id, r.trade_date, r.foreign_ratio, r.trust_ratio_est, r.dealer_ratio_est, \
r.three_inst_ratio_est, r.trust_shares_est, r.dealer_shares_est, \
r.change_5d, r.change_20d, r.change_60d, r.change_120d";

const VIEW_COLUMNS: &str = "s.code, s.name, s.market, r.trade_date, r.foreign_ratio, r.trust_ratio_est, \
r.dealer_ratio_est, r.three_inst_ratio_est, r.trust_shares_est, r.dealer_shares_est, \
r.change_5d, r.change_20d, r.change_60d, r.change_120d";

/// 一筆資料寫入的欄位數
const FIELDS: usize = 12;

fn round(value: Option<Decimal>) -> Option<Decimal> {
    value.map(|v| v.round_dp(4))
}

impl InstitutionalRatio {
    pub fn from_record(stock_id: i32, ratio: &record::InstitutionalRatio) -> Self {
        InstitutionalRatio {
            stock_id,
            trade_date: ratio.trade_date,
            foreign_ratio: round(ratio.foreign_ratio),
            trust_ratio_est: round(ratio.trust_ratio_est),
            dealer_ratio_est: round(ratio.dealer_ratio_est),
            three_inst_ratio_est: round(ratio.three_inst_ratio_est),
            trust_shares_est: ratio.trust_shares_est,
            dealer_shares_est: ratio.dealer_shares_est,
            change_5d: round(ratio.changes.change_5d),
            change_20d: round(ratio.changes.change_20d),
            change_60d: round(ratio.changes.change_60d),
            change_120d: round(ratio.changes.change_120d),
        }
    }

    pub fn to_record(&self, security_code: &str) -> record::InstitutionalRatio {
        record::InstitutionalRatio {
            security_code: security_code.to_string(),
            trade_date: self.trade_date,
            foreign_ratio: self.foreign_ratio,
            trust_ratio_est: self.trust_ratio_est,
            dealer_ratio_est: self.dealer_ratio_est,
            three_inst_ratio_est: self.three_inst_ratio_est,
            trust_shares_est: self.trust_shares_est,
            dealer_shares_est: self.dealer_shares_est,
            changes: WindowChanges {
                change_5d: self.change_5d,
                change_20d: self.change_20d,
                change_60d: self.change_60d,
                change_120d: self.change_120d,
            },
        }
    }

    /// 在同一個 transaction 內寫入單一股票的所有比例
    pub async fn upsert_for_stock(
        tx: &mut Transaction<'_, Postgres>,
        stock_id: i32,
        rows: &[record::InstitutionalRatio],
    ) -> Result<u64> {
        let items: Vec<InstitutionalRatio> = rows
            .iter()
            .map(|row| InstitutionalRatio::from_record(stock_id, row))
            .collect();
        let mut affected = 0;

        for chunk in items.chunks(database::MAX_BIND_PARAMETERS / FIELDS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                r#"INSERT INTO institutional_ratios (stock_id, trade_date, foreign_ratio, trust_ratio_est,
dealer_ratio_est, three_inst_ratio_est, trust_shares_est, dealer_shares_est,
change_5d, change_20d, change_60d, change_120d) "#,
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.stock_id)
                    .push_bind(item.trade_date)
                    .push_bind(item.foreign_ratio)
                    .push_bind(item.trust_ratio_est)
                    .push_bind(item.dealer_ratio_est)
                    .push_bind(item.three_inst_ratio_est)
                    .push_bind(item.trust_shares_est)
                    .push_bind(item.dealer_shares_est)
                    .push_bind(item.change_5d)
                    .push_bind(item.change_20d)
                    .push_bind(item.change_60d)
                    .push_bind(item.change_120d);
            });
            qb.push(
                r#"
ON CONFLICT (stock_id, trade_date) DO UPDATE SET
    foreign_ratio = EXCLUDED.foreign_ratio,
    trust_ratio_est = EXCLUDED.trust_ratio_est,
    dealer_ratio_est = EXCLUDED.dealer_ratio_est,
    three_inst_ratio_est = EXCLUDED.three_inst_ratio_est,
    trust_shares_est = EXCLUDED.trust_shares_est,
    dealer_shares_est = EXCLUDED.dealer_shares_est,
    change_5d = EXCLUDED.change_5d,
    change_20d = EXCLUDED.change_20d,
    change_60d = EXCLUDED.change_60d,
    change_120d = EXCLUDED.change_120d,
    updated_at = NOW()"#,
            );

            affected += qb
                .build()
                .execute(&mut **tx)
                .await
                .context(format!(
                    "Failed to InstitutionalRatio::upsert_for_stock({}) from database",
                    stock_id
                ))?
                .rows_affected();
        }

        Ok(affected)
    }

    /// 單一股票最近 `limit` 筆，依日期遞增
    pub async fn fetch_history(stock_id: i32, limit: i64) -> Result<Vec<InstitutionalRatioView>> {
        let sql = format!(
            r#"
SELECT * FROM (
    SELECT {}
    FROM institutional_ratios r
    JOIN stocks s ON s.id = r.stock_id
    WHERE r.stock_id = $1
    ORDER BY r.trade_date DESC
    LIMIT $2
) latest
ORDER BY trade_date"#,
            VIEW_COLUMNS
        );

        sqlx::query_as::<_, InstitutionalRatioView>(&sql)
            .bind(stock_id)
            .bind(limit)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to InstitutionalRatio::fetch_history({}) from database",
                stock_id
            ))
    }

    pub async fn fetch_latest_date() -> Result<Option<NaiveDate>> {
        sqlx::query_scalar("SELECT MAX(trade_date) FROM institutional_ratios")
            .fetch_one(database::get_connection())
            .await
            .context("Failed to InstitutionalRatio::fetch_latest_date() from database")
    }

    /// 指定日期的比例，依三大法人估算持股比例遞減
    pub async fn fetch_page(
        trade_date: NaiveDate,
        market: Option<Market>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<InstitutionalRatioView>)> {
        let market = market.map(|m| m.code());
        let from = r#"
FROM institutional_ratios r
JOIN stocks s ON s.id = r.stock_id
WHERE r.trade_date = $1 AND ($2::text IS NULL OR s.market = $2)"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", from))
            .bind(trade_date)
            .bind(market)
            .fetch_one(database::get_connection())
            .await
            .context(format!("Failed to count institutional_ratios({})", trade_date))?;

        let sql = format!(
            "SELECT {} {} ORDER BY r.three_inst_ratio_est DESC NULLS LAST, s.code LIMIT $3 OFFSET $4",
            VIEW_COLUMNS, from
        );
        let items = sqlx::query_as::<_, InstitutionalRatioView>(&sql)
            .bind(trade_date)
            .bind(market)
            .bind(limit)
            .bind(offset)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to InstitutionalRatio::fetch_page({}) from database",
                trade_date
            ))?;

        Ok((total, items))
    }

    /// 指定日期所有股票的比例，供排行使用
    pub async fn fetch_for_ranking(trade_date: NaiveDate) -> Result<Vec<(Security, record::InstitutionalRatio)>> {
        let sql = format!(
            r#"
SELECT s.code, s.name, s.market, s.total_shares, s.is_active, {}
FROM institutional_ratios r
JOIN stocks s ON s.id = r.stock_id
WHERE r.trade_date = $1 AND s.is_active"#,
            COLUMNS
        );

        let rows = sqlx::query_as::<_, RankingRow>(&sql)
            .bind(trade_date)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to InstitutionalRatio::fetch_for_ranking({}) from database",
                trade_date
            ))?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let market = row.market.parse::<Market>().ok()?;
                let ratio = row.ratio.to_record(&row.code);
                let security = Security {
                    code: row.code,
                    name: row.name,
                    market,
                    total_shares: row.total_shares,
                    is_active: row.is_active,
                };
                Some((security, ratio))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::logging;

    #[test]
    fn test_from_record_rounds_to_four_places() {
        let mut ratio = record::InstitutionalRatio::new(
            "2330".to_string(),
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
        );
        ratio.trust_ratio_est = Some(dec!(1.234567));
        ratio.changes.change_5d = Some(dec!(-1.23456));
        ratio.trust_shares_est = Some(123);

        let row = InstitutionalRatio::from_record(9, &ratio);
        assert_eq!(row.stock_id, 9);
        assert_eq!(row.trust_ratio_est, Some(dec!(1.2346)));
        assert_eq!(row.change_5d, Some(dec!(-1.2346)));
        assert_eq!(row.to_record("2330").trust_shares_est, Some(123));
        assert_eq!(row.to_record("2330").three_inst_ratio_est, None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_fetch_for_ranking() {
        dotenv::dotenv().ok();
        logging::debug_file_async("開始 InstitutionalRatio::fetch_for_ranking".to_string());
        let Ok(Some(date)) = InstitutionalRatio::fetch_latest_date().await else {
            return;
        };
        match InstitutionalRatio::fetch_for_ranking(date).await {
            Ok(rows) => logging::debug_file_async(format!("{} rows on {}", rows.len(), date)),
            Err(why) => logging::error_file_async(format!("{:?}", why)),
        }
    }
}
