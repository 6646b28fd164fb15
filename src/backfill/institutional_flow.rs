use anyhow::Result;
use chrono::NaiveDate;
use futures::{stream, StreamExt};

use crate::{
    backfill,
    crawler::{self, FetchedFlow},
    database::table::{institutional_flow::InstitutionalFlow, stock::ObservedStock},
    declare::Market,
    error::CalculationError,
    logging,
};

/// 抓取上市、上櫃指定日期的三大法人買賣超並寫入資料庫，回傳寫入筆數。
///
/// 單一市場抓取失敗只記錄，不影響另一個市場。
pub async fn execute(date: NaiveDate) -> Result<usize> {
    let (twse, tpex) = tokio::join!(fetch(Market::Twse, date), fetch(Market::Tpex, date));
    let mut flows: Vec<FetchedFlow> = Vec::with_capacity(2048);

    for result in [twse, tpex] {
        match result {
            Ok(fetched) => flows.extend(fetched),
            Err(why) => logging::error_file_async(why.to_string()),
        }
    }

    if flows.is_empty() {
        return Ok(0);
    }

    save(&flows).await
}

/// 依序回補多個日期，同時處理 `concurrency` 個日期
pub async fn execute_range(dates: Vec<NaiveDate>, concurrency: usize) -> usize {
    stream::iter(dates)
        .map(|date| async move {
            match execute(date).await {
                Ok(count) => {
                    logging::info_file_async(format!("三大法人買賣超 {} 寫入 {} 筆", date, count));
                    count
                }
                Err(why) => {
                    logging::error_file_async(format!(
                        "Failed to backfill institutional flows({}) because {:?}",
                        date, why
                    ));
                    0
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .fold(0, |total, count| async move { total + count })
        .await
}

async fn fetch(market: Market, date: NaiveDate) -> Result<Vec<FetchedFlow>, CalculationError> {
    backfill::fetch_with_retry(market.code(), date, "institutional flows", || {
        crawler::fetch_flows(market, date)
    })
    .await
}

async fn save(flows: &[FetchedFlow]) -> Result<usize> {
    let observed = flows
        .iter()
        .map(|flow| ObservedStock {
            code: flow.code.to_string(),
            name: flow.name.to_string(),
            market: flow.market,
            total_shares: None,
        })
        .collect();
    let ids = backfill::ensure_stocks(observed).await?;
    let rows = to_rows(flows, |code| ids.get(code).copied());

    InstitutionalFlow::upsert_batch(&rows).await?;

    Ok(rows.len())
}

fn to_rows<F>(flows: &[FetchedFlow], stock_id: F) -> Vec<InstitutionalFlow>
where
    F: Fn(&str) -> Option<i32>,
{
    flows
        .iter()
        .filter_map(|flow| {
            Some(InstitutionalFlow {
                stock_id: stock_id(&flow.code)?,
                trade_date: flow.trade_date,
                foreign_net: flow.foreign_net,
                trust_net: flow.trust_net,
                dealer_net: flow.dealer_net,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rows_skips_unknown_codes() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let flow = |code: &str| FetchedFlow {
            code: code.to_string(),
            name: String::new(),
            market: Market::Twse,
            trade_date: date,
            foreign_net: 1,
            trust_net: 2,
            dealer_net: 3,
        };
        let rows = to_rows(&[flow("2330"), flow("9999")], |code| {
            (code == "2330").then_some(7)
        });

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].stock_id, 7);
        assert_eq!(rows[0].dealer_net, 3);
    }

    #[tokio::test]
    #[ignore]
    async fn test_execute() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match execute(date).await {
            Ok(count) => logging::debug_file_async(format!("count:{}", count)),
            Err(why) => logging::error_file_async(format!("Failed to execute because {:?}", why)),
        }
    }
}
