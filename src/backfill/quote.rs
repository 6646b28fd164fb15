use anyhow::Result;
use chrono::NaiveDate;
use futures::{stream, StreamExt};

use crate::{
    backfill,
    crawler::{self, FetchedQuote},
    database::table::{
        stock::ObservedStock,
        stock_price::{self, StockPrice},
    },
    declare::Market,
    logging,
};

/// 抓取指定日期上市、上櫃的收盤行情並寫入資料庫，回傳寫入筆數
pub async fn execute_date(date: NaiveDate) -> Result<usize> {
    let (twse, tpex) = tokio::join!(
        backfill::fetch_with_retry(Market::Twse.code(), date, "daily quotes", || {
            crawler::fetch_daily_quotes(Market::Twse, date)
        }),
        backfill::fetch_with_retry(Market::Tpex.code(), date, "daily quotes", || {
            crawler::fetch_daily_quotes(Market::Tpex, date)
        })
    );
    let mut quotes: Vec<FetchedQuote> = Vec::with_capacity(4096);

    for result in [twse, tpex] {
        match result {
            Ok(fetched) => quotes.extend(fetched),
            Err(why) => logging::error_file_async(why.to_string()),
        }
    }

    save(&quotes).await
}

/// 回補多個日期的收盤行情
pub async fn execute_range(dates: Vec<NaiveDate>, concurrency: usize) -> usize {
    stream::iter(dates)
        .map(|date| async move {
            match execute_date(date).await {
                Ok(count) => {
                    logging::info_file_async(format!("收盤行情 {} 寫入 {} 筆", date, count));
                    count
                }
                Err(why) => {
                    logging::error_file_async(format!(
                        "Failed to backfill quotes({}) because {:?}",
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

/// 抓取上市、上櫃最近一個交易日的收盤行情並寫入資料庫
pub async fn execute(fallback_date: NaiveDate) -> Result<usize> {
    let (twse, tpex) = tokio::join!(
        backfill::fetch_with_retry(Market::Twse.code(), fallback_date, "quotes", || {
            crawler::fetch_quotes(Market::Twse, fallback_date)
        }),
        backfill::fetch_with_retry(Market::Tpex.code(), fallback_date, "quotes", || {
            crawler::fetch_quotes(Market::Tpex, fallback_date)
        })
    );
    let mut quotes: Vec<FetchedQuote> = Vec::with_capacity(4096);

    for (result, name) in [(twse, Market::Twse.name()), (tpex, Market::Tpex.name())] {
        match result {
            Ok(fetched) => {
                logging::info_file_async(format!("取完{}收盤數據 {} 筆", name, fetched.len()));
                quotes.extend(fetched);
            }
            Err(why) => logging::error_file_async(why.to_string()),
        }
    }

    let count = save(&quotes).await?;
    logging::info_file_async(format!("上市櫃收盤數據更新到資料庫完成: {}", count));

    Ok(count)
}

async fn save(quotes: &[FetchedQuote]) -> Result<usize> {
    if quotes.is_empty() {
        return Ok(0);
    }

    let observed = quotes
        .iter()
        .map(|quote| ObservedStock {
            code: quote.code.to_string(),
            name: quote.name.to_string(),
            market: quote.market,
            total_shares: None,
        })
        .collect();
    let ids = backfill::ensure_stocks(observed).await?;
    let rows: Vec<StockPrice> = quotes
        .iter()
        .filter_map(|quote| Some(to_row(*ids.get(&quote.code)?, quote)))
        .collect();

    StockPrice::upsert_batch(&rows).await?;

    Ok(rows.len())
}

fn to_row(stock_id: i32, quote: &FetchedQuote) -> StockPrice {
    StockPrice {
        stock_id,
        trade_date: quote.trade_date,
        open: quote.open,
        high: quote.high,
        low: quote.low,
        close: quote.close,
        volume: quote.volume,
        turnover: quote.turnover,
        change_amount: quote.change,
        change_percent: stock_price::change_percent(quote.close, quote.change),
        transactions: quote.transactions,
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_to_row() {
        let quote = FetchedQuote {
            code: "2330".to_string(),
            name: "台積電".to_string(),
            market: Market::Twse,
            trade_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            open: Some(dec!(780)),
            high: Some(dec!(785)),
            low: Some(dec!(775)),
            close: Some(dec!(784)),
            volume: Some(1),
            turnover: Some(2),
            change: Some(dec!(-16)),
            transactions: Some(3),
        };
        let row = to_row(5, &quote);

        assert_eq!(row.stock_id, 5);
        assert_eq!(row.change_amount, Some(dec!(-16)));
        assert_eq!(row.change_percent, Some(dec!(-2)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_execute_range() {
        dotenv::dotenv().ok();
        let dates = vec![
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
        ];
        let count = execute_range(dates, 2).await;
        logging::debug_file_async(format!("count:{}", count));
    }

    #[tokio::test]
    #[ignore]
    async fn test_execute() {
        dotenv::dotenv().ok();
        match execute(crate::util::datetime::taipei_today()).await {
            Ok(count) => logging::debug_file_async(format!("count:{}", count)),
            Err(why) => logging::error_file_async(format!("Failed to execute because {:?}", why)),
        }
    }
}
