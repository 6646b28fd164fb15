use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use hashbrown::HashMap;

use crate::{
    backfill,
    cache::SHARE,
    crawler::fbs::broker_trade::{self, FetchedBrokerTrade},
    database::table::{broker_trade::BrokerTrade, stock::Stock},
    logging,
};

/// 抓取多檔股票指定日期的券商分點進出並寫入資料庫，回傳寫入筆數。
///
/// 請求之間間隔 `delay`；`allow_latest` 時依日期查詢沒有資料的股票會改抓最新一期。
pub async fn execute(
    codes: &[String],
    date: NaiveDate,
    allow_latest: bool,
    delay: Duration,
) -> Result<usize> {
    let mut trades: Vec<FetchedBrokerTrade> = Vec::with_capacity(codes.len() * 60);

    for code in codes {
        trades.extend(fetch(code, date, allow_latest).await);
        tokio::time::sleep(delay).await;
    }

    save(&trades).await
}

/// 依序回補多個日期，`target` 當日允許改抓最新一期
pub async fn execute_range(
    codes: &[String],
    dates: Vec<NaiveDate>,
    target: NaiveDate,
    delay: Duration,
) -> usize {
    let mut total = 0;

    for date in dates {
        match execute(codes, date, date == target, delay).await {
            Ok(count) => {
                logging::info_file_async(format!("券商分點進出 {} 寫入 {} 筆", date, count));
                total += count;
            }
            Err(why) => {
                logging::error_file_async(format!(
                    "Failed to backfill broker trades({}) because {:?}",
                    date, why
                ));
            }
        }
    }

    total
}

async fn fetch(code: &str, date: NaiveDate, allow_latest: bool) -> Vec<FetchedBrokerTrade> {
    let dated = backfill::fetch_with_retry(code, date, "broker trades", || {
        broker_trade::visit(code, date)
    })
    .await;

    let result = match dated {
        Ok(trades) if !trades.is_empty() || !allow_latest => Ok(trades),
        Err(why) if !allow_latest => Err(why),
        _ => {
            backfill::fetch_with_retry(code, date, "broker trades latest", || {
                broker_trade::visit_latest(code, date)
            })
            .await
        }
    };

    match result {
        Ok(trades) => trades,
        Err(why) => {
            logging::error_file_async(why.to_string());
            Vec::new()
        }
    }
}

async fn save(trades: &[FetchedBrokerTrade]) -> Result<usize> {
    let mut ids: HashMap<String, i32> = HashMap::new();
    for trade in trades {
        if ids.contains_key(&trade.code) {
            continue;
        }
        if let Some(id) = stock_id(&trade.code).await? {
            ids.insert(trade.code.to_string(), id);
        }
    }

    let rows: Vec<BrokerTrade> = trades
        .iter()
        .filter_map(|trade| Some(to_row(*ids.get(&trade.code)?, trade)))
        .collect();

    if rows.is_empty() {
        return Ok(0);
    }

    BrokerTrade::upsert_batch(&rows).await?;

    Ok(rows.len())
}

/// 分點資料不含股票名稱與市場，只寫入已存在於 `stocks` 的股票
async fn stock_id(code: &str) -> Result<Option<i32>> {
    if let Some(stock) = SHARE.get_stock(code) {
        return Ok(Some(stock.id));
    }

    let stock = Stock::fetch_by_code(code).await?;
    if stock.is_none() {
        logging::warn_file_async(format!("broker trades of unknown stock {} are skipped", code));
    }

    Ok(stock.map(|s| s.id))
}

fn to_row(stock_id: i32, trade: &FetchedBrokerTrade) -> BrokerTrade {
    BrokerTrade {
        stock_id,
        trade_date: trade.trade_date,
        broker_name: trade.broker_name.to_string(),
        broker_id: trade.broker_id.clone(),
        buy_vol: trade.buy_vol,
        sell_vol: trade.sell_vol,
        net_vol: trade.net_vol,
        pct: trade.pct,
        rank: trade.rank,
        side: trade.side.code().to_string(),
    }
}
