use anyhow::Result;
use chrono::NaiveDate;
use hashbrown::HashMap;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use crate::{
    cache::SHARE,
    database::table::stock::{ObservedStock, Stock},
    error::CalculationError,
};

/// 投信、自營商基準持股
pub mod baseline;
/// 券商分點進出
pub mod broker_trade;
/// 外資持股
pub mod foreign_holding;
/// 三大法人買賣超
pub mod institutional_flow;
/// 每日收盤行情
pub mod quote;

/// 新增或更新抓取時觀察到的股票並同步快取，回傳 代號 → stock_id
pub(crate) async fn ensure_stocks(observed: Vec<ObservedStock>) -> Result<HashMap<String, i32>> {
    if observed.is_empty() {
        return Ok(HashMap::new());
    }

    let stocks = Stock::upsert_many(&observed).await?;
    let ids = stocks.iter().map(|s| (s.code.to_string(), s.id)).collect();
    SHARE.set_stocks(stocks);

    Ok(ids)
}

/// 以指數退避重試上游抓取，最終失敗時轉成 `UpstreamFetch`。
///
/// `code` 為市場代碼或股票代號，只用於錯誤訊息。
pub(crate) async fn fetch_with_retry<T, F, Fut>(
    code: &str,
    date: NaiveDate,
    source_name: &str,
    action: F,
) -> Result<T, CalculationError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(500)
        .map(jitter)
        .take(2);

    Retry::spawn(strategy, action)
        .await
        .map_err(|why| CalculationError::UpstreamFetch {
            code: code.to_string(),
            date,
            source_name: source_name.to_string(),
            message: format!("{:?}", why),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;

    use super::*;
    use crate::declare::Market;

    #[tokio::test]
    async fn test_fetch_with_retry_reports_upstream_failure() {
        let attempts = AtomicUsize::new(0);
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let result: Result<Vec<i32>, CalculationError> =
            fetch_with_retry(Market::Tpex.code(), date, "T86", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow!("503")) }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(CalculationError::UpstreamFetch { code, source_name, .. }) => {
                assert_eq!(code, "TPEX");
                assert_eq!(source_name, "T86");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_with_retry_recovers() {
        let attempts = AtomicUsize::new(0);
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let result = fetch_with_retry(Market::Twse.code(), date, "T86", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow!("timeout"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
    }
}
