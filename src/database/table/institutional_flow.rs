use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    calculation::record::DailyFlow,
    database::{self, table},
    declare::Market,
};

/// 三大法人每日買賣超表 `institutional_flows` 的資料列
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct InstitutionalFlow {
    pub stock_id: i32,
    pub trade_date: NaiveDate,
    /// 外資(含外資自營商)買賣超股數
    pub foreign_net: i64,
    /// 投信買賣超股數
    pub trust_net: i64,
    /// 自營商買賣超股數
    pub dealer_net: i64,
}

/// API 使用，含股票代號與名稱
#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct InstitutionalFlowView {
    pub code: String,
    pub name: String,
    pub market: String,
    pub trade_date: NaiveDate,
    pub foreign_net: i64,
    pub trust_net: i64,
    pub dealer_net: i64,
    pub total_net: i64,
}

impl InstitutionalFlow {
    pub fn to_daily_flow(&self, security_code: &str) -> DailyFlow {
        DailyFlow {
            security_code: security_code.to_string(),
            trade_date: self.trade_date,
            foreign_net: self.foreign_net,
            trust_net: self.trust_net,
            dealer_net: self.dealer_net,
        }
    }

    /// 批次新增或更新，同一 (stock_id, trade_date) 以最後寫入為準
    pub async fn upsert_batch(items: &[InstitutionalFlow]) -> Result<u64> {
        let unique = table::dedup_by_stock_date(items, |item| (item.stock_id, item.trade_date));
        let mut tx = database::get_tx().await?;
        let mut affected = 0;

        for chunk in unique.chunks(database::MAX_BIND_PARAMETERS / 5) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO institutional_flows (stock_id, trade_date, foreign_net, trust_net, dealer_net) ",
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.stock_id)
                    .push_bind(item.trade_date)
                    .push_bind(item.foreign_net)
                    .push_bind(item.trust_net)
                    .push_bind(item.dealer_net);
            });
            qb.push(
                r#"
ON CONFLICT (stock_id, trade_date) DO UPDATE SET
    foreign_net = EXCLUDED.foreign_net,
    trust_net = EXCLUDED.trust_net,
    dealer_net = EXCLUDED.dealer_net"#,
            );

            affected += qb
                .build()
                .execute(&mut *tx)
                .await
                .context(format!(
                    "Failed to InstitutionalFlow::upsert_batch({}) from database",
                    chunk.len()
                ))?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    /// 單一股票的全部買賣超，依日期遞增
    pub async fn fetch_by_stock(stock_id: i32) -> Result<Vec<InstitutionalFlow>> {
        let sql = r#"
SELECT stock_id, trade_date, foreign_net, trust_net, dealer_net
FROM institutional_flows
WHERE stock_id = $1
ORDER BY trade_date"#;

        sqlx::query_as::<_, InstitutionalFlow>(sql)
            .bind(stock_id)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to InstitutionalFlow::fetch_by_stock({}) from database",
                stock_id
            ))
    }

    /// 最後一個有買賣超資料的日期
    pub async fn fetch_last_trade_date() -> Result<Option<NaiveDate>> {
        sqlx::query_scalar("SELECT MAX(trade_date) FROM institutional_flows")
            .fetch_one(database::get_connection())
            .await
            .context("Failed to InstitutionalFlow::fetch_last_trade_date() from database")
    }

    /// 指定日期的買賣超，依三大法人合計買賣超遞減
    pub async fn fetch_page(
        trade_date: NaiveDate,
        market: Option<Market>,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<InstitutionalFlowView>)> {
        let market = market.map(|m| m.code());
        let from = r#"
FROM institutional_flows f
JOIN stocks s ON s.id = f.stock_id
WHERE f.trade_date = $1 AND ($2::text IS NULL OR s.market = $2)"#;

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", from))
            .bind(trade_date)
            .bind(market)
            .fetch_one(database::get_connection())
            .await
            .context(format!("Failed to count institutional_flows({})", trade_date))?;

        let sql = format!(
            r#"
SELECT s.code, s.name, s.market, f.trade_date, f.foreign_net, f.trust_net, f.dealer_net,
       f.foreign_net + f.trust_net + f.dealer_net AS total_net
{}
ORDER BY total_net DESC, s.code
LIMIT $3 OFFSET $4"#,
            from
        );
        let items = sqlx::query_as::<_, InstitutionalFlowView>(&sql)
            .bind(trade_date)
            .bind(market)
            .bind(limit)
            .bind(offset)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to InstitutionalFlow::fetch_page({}) from database",
                trade_date
            ))?;

        Ok((total, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    #[test]
    fn test_to_daily_flow() {
        let flow = InstitutionalFlow {
            stock_id: 7,
            trade_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            foreign_net: 1,
            trust_net: -2,
            dealer_net: 3,
        };
        let daily = flow.to_daily_flow("2330");

        assert_eq!(daily.security_code, "2330");
        assert_eq!(daily.trust_net, -2);
    }

    #[tokio::test]
    #[ignore]
    async fn test_fetch_last_trade_date() {
        dotenv::dotenv().ok();
        logging::debug_file_async("開始 fetch_last_trade_date".to_string());
        match InstitutionalFlow::fetch_last_trade_date().await {
            Ok(date) => logging::debug_file_async(format!("last:{:?}", date)),
            Err(why) => logging::error_file_async(format!("{:?}", why)),
        }
    }
}
