use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};

use crate::{
    calculation::record::Baseline,
    database::{self, table},
};

/// 投信、自營商基準持股表 `institutional_baselines` 的資料列
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct InstitutionalBaseline {
    pub stock_id: i32,
    pub baseline_date: NaiveDate,
    pub trust_shares_base: i64,
    pub dealer_shares_base: i64,
}

impl InstitutionalBaseline {
    pub fn to_baseline(&self, security_code: &str) -> Baseline {
        Baseline {
            security_code: security_code.to_string(),
            baseline_date: self.baseline_date,
            trust_shares_base: self.trust_shares_base,
            dealer_shares_base: self.dealer_shares_base,
        }
    }

    /// 同一 (stock_id, baseline_date) 以最後提供的一筆為準
    pub async fn upsert_batch(items: &[InstitutionalBaseline]) -> Result<u64> {
        let unique = table::dedup_by_stock_date(items, |item| (item.stock_id, item.baseline_date));
        let mut tx = database::get_tx().await?;
        let mut affected = 0;

        for chunk in unique.chunks(database::MAX_BIND_PARAMETERS / 4) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO institutional_baselines (stock_id, baseline_date, trust_shares_base, dealer_shares_base) ",
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.stock_id)
                    .push_bind(item.baseline_date)
                    .push_bind(item.trust_shares_base)
                    .push_bind(item.dealer_shares_base);
            });
            qb.push(
                r#"
ON CONFLICT (stock_id, baseline_date) DO UPDATE SET
    trust_shares_base = EXCLUDED.trust_shares_base,
    dealer_shares_base = EXCLUDED.dealer_shares_base"#,
            );

            affected += qb
                .build()
                .execute(&mut *tx)
                .await
                .context(format!(
                    "Failed to InstitutionalBaseline::upsert_batch({}) from database",
                    chunk.len()
                ))?
                .rows_affected();
        }

        tx.commit().await?;

        Ok(affected)
    }

    pub async fn fetch_by_stock(stock_id: i32) -> Result<Vec<InstitutionalBaseline>> {
        let sql = r#"
SELECT stock_id, baseline_date, trust_shares_base, dealer_shares_base
FROM institutional_baselines
WHERE stock_id = $1
ORDER BY baseline_date"#;

        sqlx::query_as::<_, InstitutionalBaseline>(sql)
            .bind(stock_id)
            .fetch_all(database::get_connection())
            .await
            .context(format!(
                "Failed to InstitutionalBaseline::fetch_by_stock({}) from database",
                stock_id
            ))
    }
}
