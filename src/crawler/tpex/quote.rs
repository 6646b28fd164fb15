use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    crawler::{normalize_code, tpex, FetchedQuote, FieldTable, QuoteColumns},
    declare::Market,
    logging,
    util::{convert::FromValue, datetime, http},
};

/// 舊版回應沒有 `fields`，欄位順序固定
const DAILY_FIELDS: [&str; 10] = [
    "代號", "名稱", "收盤", "漲跌", "開盤", "最高", "最低", "成交股數", "成交金額(元)", "成交筆數",
];

/// 上櫃股票行情(OpenAPI)
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct MainboardQuote {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "SecuritiesCompanyCode")]
    code: String,
    #[serde(rename = "CompanyName")]
    name: String,
    #[serde(rename = "Close")]
    close: String,
    #[serde(rename = "Change")]
    change: String,
    #[serde(rename = "Open")]
    open: String,
    #[serde(rename = "High")]
    high: String,
    #[serde(rename = "Low")]
    low: String,
    #[serde(rename = "TradingShares")]
    trading_shares: String,
    #[serde(rename = "TransactionAmount")]
    transaction_amount: String,
    #[serde(rename = "TransactionNumber", alias = "Transaction")]
    transaction_number: String,
}

/// 抓取上櫃股票最近一個交易日的收盤行情
pub async fn visit(fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let url = "https://www.tpex.org.tw/openapi/v1/tpex_mainboard_quotes";
    let body = http::get(url, None).await?;

    parse(&body, fallback_date)
}

pub fn parse(body: &str, fallback_date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let items: Vec<MainboardQuote> = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse tpex_mainboard_quotes because {:?}", why))?;

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let code = normalize_code(&item.code)?;
            let trade_date = datetime::parse_taiwan_date(&item.date).unwrap_or(fallback_date);

            Some(FetchedQuote {
                code,
                name: item.name.get_text(),
                market: Market::Tpex,
                trade_date,
                open: item.open.get_optional_decimal(),
                high: item.high.get_optional_decimal(),
                low: item.low.get_optional_decimal(),
                close: item.close.get_optional_decimal(),
                volume: item.trading_shares.get_optional_i64(),
                turnover: item.transaction_amount.get_optional_i64(),
                change: item.change.get_optional_decimal(),
                transactions: item.transaction_number.get_optional_i64(),
            })
        })
        .collect())
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct DailyCloseResponse {
    tables: Vec<FieldTable>,
    #[serde(rename = "aaData")]
    aa_data: Vec<Vec<serde_json::Value>>,
}

/// 抓取指定日期上櫃股票的收盤行情
pub async fn visit_daily(date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let url = format!(
        "https://www.{}/web/stock/aftertrading/otc_quotes_no1430/stk_wn1430_result.php?l=zh-tw&o=json&se=EW&d={}",
        tpex::HOST,
        datetime::to_roc_date(date)
    );
    let body = http::get(&url, None).await?;

    parse_daily(&body, date)
}

/// 解析上櫃每日收盤行情，沒有任何資料列時視為休市
pub fn parse_daily(body: &str, date: NaiveDate) -> Result<Vec<FetchedQuote>> {
    let response: DailyCloseResponse = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse stk_wn1430_result({}) because {:?}", date, why))?;

    let mut tables = response.tables;
    tables.push(FieldTable {
        fields: Vec::new(),
        data: response.aa_data,
    });

    let Some(table) = tables.into_iter().find(|t| !t.data.is_empty()) else {
        logging::info_file_async(format!("stk_wn1430_result has no data on {}", date));
        return Ok(Vec::new());
    };

    let located = if table.fields.is_empty() {
        QuoteColumns::locate(&DAILY_FIELDS)
    } else {
        QuoteColumns::locate(&table.fields)
    };
    let columns = located.ok_or_else(|| {
        anyhow!(
            "stk_wn1430_result({}) is missing required fields: {:?}",
            date,
            table.fields
        )
    })?;

    Ok(table
        .data
        .iter()
        .filter_map(|row| columns.parse_row(row, Market::Tpex, date))
        .collect())
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_parse() {
        let body = r#"[
            {"Date":"1130502","SecuritiesCompanyCode":"6488","CompanyName":"環球晶","Close":"480.50","Change":"+2.50",
             "Open":"478.00","High":"482.00","Low":"477.00","Average":"479.80","TradingShares":"1,234,567",
             "TransactionAmount":"592,000,000","TransactionNumber":"3,210"},
            {"Date":"1130502","SecuritiesCompanyCode":"8069","CompanyName":"元太","Close":"---","Change":"除息",
             "Open":"---","High":"---","Low":"---","TradingShares":"0","TransactionAmount":"0","TransactionNumber":"0"}
        ]"#;
        let fallback = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let quotes = parse(body, fallback).unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].trade_date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(quotes[0].change, Some(dec!(2.50)));
        assert_eq!(quotes[0].volume, Some(1_234_567));
        assert_eq!(quotes[0].transactions, Some(3_210));
        assert_eq!(quotes[1].close, None);
        assert_eq!(quotes[1].change, None);
    }

    #[test]
    fn test_parse_daily() {
        let body = r#"{"date":"20240502","tables":[{"title":"上櫃股票行情","fields":["代號","名稱","收盤","漲跌",
            "開盤","最高","最低","成交股數","成交金額(元)","成交筆數","最後買價"],
            "data":[
                ["6488","環球晶","480.50","+2.50","478.00","482.00","477.00","1,234,567","592,000,000","3,210","480.00"],
                ["8069","元太","235.00","-1.00","236.00","237.00","234.00","2,000","470,000","15","234.50"],
                ["5347","世界","----","---","----","----","----","0","0","0",""],
                ["710001","元富01購","1.00","0.00","1.00","1.00","1.00","1","1","1",""]
            ]}]}"#;
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let quotes = parse_daily(body, date).unwrap();

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].code, "6488");
        assert_eq!(quotes[0].trade_date, date);
        assert_eq!(quotes[0].change, Some(dec!(2.5)));
        assert_eq!(quotes[0].turnover, Some(592_000_000));
        assert_eq!(quotes[1].change, Some(dec!(-1)));
    }

    #[test]
    fn test_parse_daily_legacy_and_holiday() {
        let body = r#"{"reportDate":"113/05/02","aaData":[
            ["6488","環球晶","480.50","+2.50","478.00","482.00","477.00","1,234,567","592,000,000","3,210"]
        ]}"#;
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let quotes = parse_daily(body, date).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].close, Some(dec!(480.5)));
        assert_eq!(quotes[0].transactions, Some(3_210));

        let holiday = r#"{"date":"20240504","tables":[{"fields":["代號"],"data":[]}]}"#;
        assert!(parse_daily(holiday, date).unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit_daily() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match visit_daily(date).await {
            Ok(list) => logging::debug_file_async(format!("quotes:{}", list.len())),
            Err(why) => logging::error_file_async(format!("Failed to visit_daily because {:?}", why)),
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit() {
        dotenv::dotenv().ok();
        match visit(datetime::taipei_today()).await {
            Ok(list) => logging::debug_file_async(format!("quotes:{}", list.len())),
            Err(why) => logging::error_file_async(format!("Failed to visit because {:?}", why)),
        }
    }
}
