use anyhow::Result;
use chrono::NaiveDate;
use futures::{stream, StreamExt};

use crate::{
    backfill,
    crawler::{self, tpex, FetchedForeignHolding},
    database::table::{foreign_holding::ForeignHolding, stock::ObservedStock},
    declare::Market,
    error::CalculationError,
    logging,
};

/// 抓取指定日期上市、上櫃的外資持股並寫入資料庫，回傳寫入筆數。
///
/// `allow_latest` 時(ETL 目標日)，上櫃依日期查詢沒有資料會改抓最新一期的持股排行。
pub async fn execute(date: NaiveDate, allow_latest: bool) -> Result<usize> {
    let mut holdings: Vec<FetchedForeignHolding> = Vec::with_capacity(4096);
    let (twse, tpex) = tokio::join!(fetch(Market::Twse, date), fetch(Market::Tpex, date));

    match twse {
        Ok(fetched) => holdings.extend(fetched),
        Err(why) => logging::error_file_async(why.to_string()),
    }

    match tpex {
        Ok(fetched) if !fetched.is_empty() => holdings.extend(fetched),
        result => {
            if let Err(why) = result {
                logging::error_file_async(why.to_string());
            }
            if allow_latest {
                holdings.extend(fetch_latest(date).await);
            }
        }
    }

    if holdings.is_empty() {
        return Ok(0);
    }

    save(&holdings).await
}

/// 回補多個日期的外資持股，兩個市場都依日期抓取
pub async fn execute_range(dates: Vec<NaiveDate>, target: NaiveDate, concurrency: usize) -> usize {
    stream::iter(dates)
        .map(|date| async move {
            match execute(date, date == target).await {
                Ok(count) => {
                    logging::info_file_async(format!("外資持股 {} 寫入 {} 筆", date, count));
                    count
                }
                Err(why) => {
                    logging::error_file_async(format!(
                        "Failed to backfill foreign holdings({}) because {:?}",
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

/// 上櫃最新一期持股排行，資料日期記為 `date`
async fn fetch_latest(date: NaiveDate) -> Vec<FetchedForeignHolding> {
    match backfill::fetch_with_retry(Market::Tpex.code(), date, "qfii latest", || {
        tpex::foreign_holding::visit_latest(date)
    })
    .await
    {
        Ok(fetched) => {
            logging::warn_file_async(format!(
                "上櫃外資持股 {} 無日資料，改用最新排行 {} 筆",
                date,
                fetched.len()
            ));
            fetched
        }
        Err(why) => {
            logging::error_file_async(why.to_string());
            Vec::new()
        }
    }
}

async fn fetch(market: Market, date: NaiveDate) -> Result<Vec<FetchedForeignHolding>, CalculationError> {
    backfill::fetch_with_retry(market.code(), date, "foreign holdings", || {
        crawler::fetch_foreign_holdings(market, date)
    })
    .await
}

async fn save(holdings: &[FetchedForeignHolding]) -> Result<usize> {
    let observed = holdings
        .iter()
        .map(|holding| ObservedStock {
            code: holding.code.to_string(),
            name: holding.name.to_string(),
            market: holding.market,
            total_shares: holding.total_shares,
        })
        .collect();
    let ids = backfill::ensure_stocks(observed).await?;
    let rows: Vec<ForeignHolding> = holdings
        .iter()
        .filter_map(|holding| {
            Some(ForeignHolding {
                stock_id: *ids.get(&holding.code)?,
                trade_date: holding.trade_date,
                total_shares: holding.total_shares,
                foreign_shares: holding.foreign_shares,
                foreign_ratio: holding.foreign_ratio,
            })
        })
        .collect();

    ForeignHolding::upsert_batch(&rows).await?;

    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore]
    async fn test_execute() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match execute(date, false).await {
            Ok(count) => logging::debug_file_async(format!("count:{}", count)),
            Err(why) => logging::error_file_async(format!("Failed to execute because {:?}", why)),
        }
    }
}
