//! `RatioStore` 的 PostgreSQL 實作。

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::{
    cache::SHARE,
    calculation::{
        institutional_ratio::{RatioStore, SecurityHistory},
        record::{InstitutionalRatio, Security},
    },
    database::{
        self,
        table::{
            foreign_holding::ForeignHolding, institutional_baseline::InstitutionalBaseline,
            institutional_flow::InstitutionalFlow, institutional_ratio, stock::Stock,
        },
    },
};

#[derive(Debug, Default, Clone, Copy)]
pub struct PgRatioStore;

impl PgRatioStore {
    async fn stock_id(&self, code: &str) -> Result<i32> {
        if let Some(stock) = SHARE.get_stock(code) {
            return Ok(stock.id);
        }

        let stock = Stock::fetch_by_code(code)
            .await?
            .ok_or_else(|| anyhow!("stock {} does not exist", code))?;
        let id = stock.id;
        SHARE.set_stocks(vec![stock]);

        Ok(id)
    }
}

#[async_trait]
impl RatioStore for PgRatioStore {
    async fn load_history(&self, security: &Security) -> Result<SecurityHistory> {
        let stock_id = self.stock_id(&security.code).await?;
        let (flows, baselines, holdings) = tokio::try_join!(
            InstitutionalFlow::fetch_by_stock(stock_id),
            InstitutionalBaseline::fetch_by_stock(stock_id),
            ForeignHolding::fetch_by_stock(stock_id),
        )?;

        Ok(SecurityHistory {
            security: security.clone(),
            flows: flows.iter().map(|f| f.to_daily_flow(&security.code)).collect(),
            baselines: baselines.iter().map(|b| b.to_baseline(&security.code)).collect(),
            foreign_holdings: holdings.iter().map(|h| h.to_record(&security.code)).collect(),
        })
    }

    async fn save_ratios(&self, security: &Security, rows: &[InstitutionalRatio]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let stock_id = self.stock_id(&security.code).await?;
        let mut tx = database::get_tx().await?;
        institutional_ratio::InstitutionalRatio::upsert_for_stock(&mut tx, stock_id, rows).await?;
        tx.commit()
            .await
            .context(format!("Failed to commit ratios of {}", security.code))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calculation::institutional_ratio::recompute, logging};

    #[tokio::test]
    #[ignore]
    async fn test_recompute_one_security() {
        dotenv::dotenv().ok();
        let Ok(Some(stock)) = Stock::fetch_by_code("2330").await else {
            return;
        };
        let Some(security) = stock.to_security() else {
            return;
        };

        let summary = recompute(&PgRatioStore, vec![security]).await;
        logging::debug_file_async(format!("summary:{:?}", summary));
        assert!(summary.failures.is_empty());
    }
}
