use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde::Deserialize;

use crate::{
    crawler::{tpex, FetchedForeignHolding, FieldTable, HoldingColumns},
    declare::Market,
    logging,
    util::{datetime, http},
};

/// `aaData` 沒有表頭，欄位依序為 代號、發行股數、持有股數、持股比率
const POSITIONAL: HoldingColumns = HoldingColumns {
    code: 0,
    name: None,
    total_shares: Some(1),
    foreign_shares: Some(2),
    foreign_ratio: Some(3),
};

/// 僑外資持股(依日期查詢)的回應，新舊版分別放在 `tables` 與 `aaData`
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct QfiiResponse {
    #[serde(rename = "aaData")]
    aa_data: Vec<Vec<serde_json::Value>>,
    tables: Vec<FieldTable>,
}

/// 抓取指定日期上櫃股票的僑外資及陸資持股，休市日回傳空集合
pub async fn visit(date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
    let url = format!(
        "https://www.{}/web/stock/exright/QFII.php?l=zh-tw&d={}&se=EW",
        tpex::HOST,
        datetime::to_roc_date(date)
    );
    let body = http::get(&url, None).await?;

    parse(&body, date)
}

pub fn parse(body: &str, date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
    let response: QfiiResponse = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse QFII({}) because {:?}", date, why))?;

    if !response.aa_data.is_empty() {
        return Ok(response
            .aa_data
            .iter()
            .filter_map(|row| POSITIONAL.parse_row(row, Market::Tpex, date))
            .collect());
    }

    Ok(response
        .tables
        .iter()
        .filter_map(|table| Some((HoldingColumns::locate(&table.fields)?, table)))
        .flat_map(|(columns, table)| {
            table
                .data
                .iter()
                .filter_map(move |row| columns.parse_row(row, Market::Tpex, date))
        })
        .collect())
}

/// 抓取最新一期的僑外資持股排行(CSV)，只有依日期查詢沒有資料時才會用到
pub async fn visit_latest(date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
    let url = format!(
        "https://www.{}/web/stock/3insti/qfii/qfii_result.php?l=zh-tw&o=data",
        tpex::HOST
    );
    let body = http::get_utf8_or_big5(&url).await?;

    parse_latest(&body, date)
}

/// 解析 CSV，表頭之前的標題列會被略過
pub fn parse_latest(body: &str, date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());
    let mut columns: Option<HoldingColumns> = None;
    let mut holdings = Vec::with_capacity(1024);

    for record in reader.records() {
        let record = record.map_err(|why| anyhow!("Failed to read qfii csv because {:?}", why))?;
        let row: Vec<String> = record.iter().map(|field| field.to_string()).collect();

        match columns {
            Some(c) => {
                if let Some(holding) = c.parse_row(&row, Market::Tpex, date) {
                    holdings.push(holding);
                }
            }
            None => columns = HoldingColumns::locate(&row),
        }
    }

    if columns.is_none() {
        logging::warn_file_async(format!("qfii csv has no header row on {}", date));
    }

    Ok(holdings)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_parse() {
        let body = r#"{"reportDate":"113/05/02","iTotalRecords":3,"aaData":[
            ["6488","478,104,000","178,104,000","37.25"],
            ["5347","1,686,000,000","--","--"],
            ["020012","1,000","1","0.01"]
        ]}"#;
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let holdings = parse(body, date).unwrap();

        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].code, "6488");
        assert_eq!(holdings[0].trade_date, date);
        assert_eq!(holdings[0].total_shares, Some(478_104_000));
        assert_eq!(holdings[0].foreign_shares, Some(178_104_000));
        assert_eq!(holdings[0].foreign_ratio, Some(dec!(37.25)));
        assert_eq!(holdings[1].foreign_shares, None);
    }

    #[test]
    fn test_parse_tables() {
        let body = r#"{"date":"20240502","tables":[{"title":"僑外資及陸資持股比例","fields":
            ["代號","名稱","發行股數","僑外資及陸資尚可投資股數","僑外資及陸資持有股數","僑外資及陸資持股比率"],
            "data":[["6488","環球晶","478,104,000","300,000,000","178,104,000","37.25"]]}]}"#;
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let holdings = parse(body, date).unwrap();

        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].name, "環球晶");
        assert_eq!(holdings[0].foreign_shares, Some(178_104_000));
    }

    #[test]
    fn test_parse_holiday() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        assert!(parse(r#"{"reportDate":"113/05/04","aaData":[]}"#, date).unwrap().is_empty());
        assert!(parse("<html>", date).is_err());
    }

    #[test]
    fn test_parse_latest() {
        let body = "僑外資及陸資持股比例排行表\n\
資料日期:113/05/02\n\
排行,代號,名稱,發行股數,僑外資及陸資尚可投資股數,僑外資及陸資持有股數,僑外資及陸資尚可投資比率,僑外資及陸資持股比率\n\
1,\"6488\",\"環球晶\",\"478,104,000\",\"300,000,000\",\"178,104,000\",\"62.75\",\"37.25\"\n\
2,\"5347\",\"世界\",\"1,686,000,000\",\"--\",\"--\",\"--\",\"--\"\n\
,合計,,,,,,\n";
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let holdings = parse_latest(body, date).unwrap();

        assert_eq!(holdings.len(), 2);
        assert_eq!(holdings[0].code, "6488");
        assert_eq!(holdings[0].name, "環球晶");
        assert_eq!(holdings[0].total_shares, Some(478_104_000));
        assert_eq!(holdings[0].foreign_shares, Some(178_104_000));
        assert_eq!(holdings[0].foreign_ratio, Some(dec!(37.25)));
        assert_eq!(holdings[1].foreign_ratio, None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match visit(date).await {
            Ok(list) => logging::debug_file_async(format!("holdings:{}", list.len())),
            Err(why) => logging::error_file_async(format!("Failed to visit because {:?}", why)),
        }
    }
}
