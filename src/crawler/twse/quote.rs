use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    crawler::{normalize_code, twse, FetchedQuote, FieldTable, QuoteColumns},
    declare::Market,
    logging,
    util::{convert::FromValue, datetime, http},
};

/// 上市個股日成交資訊(OpenAPI)
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct StockDayAll {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "TradeVolume")]
    trade_volume: String,
    #[serde(rename = "TradeValue")]
    trade_value: String,
    #[serde(rename = "OpeningPrice")]
    opening_price: String,
    #[serde(rename = "HighestPrice")]
    highest_price: String,
    #[serde(rename = "LowestPrice")]
    lowest_price: String,
    #[serde(rename = "ClosingPrice")]
    closing_price: String,
    #[serde(rename = "Change")]
    change: String,
    #[serde(rename = "Transaction")]
    transaction: String,
}

/// 抓取上市股票最近一個交易日的收盤行情
pub async fn visit(fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let url = "https://openapi.twse.com.tw/v1/exchangeReport/STOCK_DAY_ALL";
    let body = http::get(url, None).await?;

    parse(&body, fallback_date)
}

pub fn parse(body: &str, fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let items: Vec<StockDayAll> = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse STOCK_DAY_ALL because {:?}", why))?;

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let code = normalize_code(&item.code)?;
            let trade_date = datetime::parse_taiwan_date(&item.date).unwrap_or(fallback_date);

            Some(FetchedQuote {
                code,
                name: item.name.get_text(),
                market: Market::Twse,
                trade_date,
                open: item.opening_price.get_optional_decimal(),
                high: item.highest_price.get_optional_decimal(),
                low: item.lowest_price.get_optional_decimal(),
                close: item.closing_price.get_optional_decimal(),
                volume: item.trade_volume.get_optional_i64(),
                turnover: item.trade_value.get_optional_i64(),
                change: item.change.get_optional_decimal(),
                transactions: item.transaction.get_optional_i64(),
            })
        })
        .collect())
}

/// 每日收盤行情(MI_INDEX)，新版放在 `tables`，舊版放在 `fields9`/`data9`
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct MarketIndex {
    stat: Option<String>,
    tables: Vec<FieldTable>,
    fields9: Vec<String>,
    data9: Vec<Vec<serde_json::Value>>,
}

/// 抓取指定日期上市股票的收盤行情
pub async fn visit_daily(date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let url = format!(
        "https://www.{}/exchangeReport/MI_INDEX?response=json&date={}&type=ALLBUT0999",
        twse::HOST,
        date.format("%Y%m%d")
    );
    let body = http::get(&url, None).await?;

    parse_daily(&body, date)
}

/// 解析 MI_INDEX，休市日回傳空集合
pub fn parse_daily(body: &str, date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let response: MarketIndex = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse MI_INDEX({}) because {:?}", date, why))?;

    if !twse::is_ok(response.stat.as_deref()) {
        logging::info_file_async(format!("MI_INDEX has no data on {}: {:?}", date, response.stat));
        return Ok(Vec::new());
    }

    let mut tables = response.tables;
    tables.push(FieldTable {
        fields: response.fields9,
        data: response.data9,
    });

    // 大盤統計、漲跌家數等表格沒有收盤價欄位
    let Some((columns, table)) = tables
        .iter()
        .filter(|table| !table.data.is_empty())
        .find_map(|table| Some((QuoteColumns::locate(&table.fields)?, table)))
    else {
        logging::info_file_async(format!("MI_INDEX has no quote table on {}", date));
        return Ok(Vec::new());
    };

    Ok(table
        .data
        .iter()
        .filter_map(|row| columns.parse_row(row, Market::Twse, date))
        .collect())
}
