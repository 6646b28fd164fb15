use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    crawler::{twse, FetchedFlow, FieldTable, FlowColumns},
    declare::Market,
    logging,
    util::http,
};

#[derive(Deserialize, Debug)]
struct T86Response {
    stat: Option<String>,
    #[serde(flatten)]
    table: FieldTable,
}

/// 抓取上市股票三大法人買賣超日報(T86)
pub async fn visit(date: NaiveDate) -> Result<Vec<FetchedFlow>> {
    let url = format!(
        "https://www.{}/rwd/zh/fund/T86?date={}&selectType=ALLBUT0999&response=json",
        twse::HOST,
        date.format("%Y%m%d")
    );
    let body = http::get(&url, None).await?;

    parse(&body, date)
}

/// 解析 T86 的 JSON，休市日回傳空集合
pub fn parse(body: &str, date: NaiveDate) -> Result<Vec<FetchedFlow>> {
    let response: T86Response = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse T86({}) because {:?}", date, why))?;

    if !twse::is_ok(response.stat.as_deref()) || response.table.data.is_empty() {
        logging::info_file_async(format!(
            "T86 has no data on {}: {:?}",
            date, response.stat
        ));
        return Ok(Vec::new());
    }

    let columns = FlowColumns::locate(&response.table.fields).ok_or_else(|| {
        anyhow!(
            "T86({}) is missing required fields: {:?}",
            date,
            response.table.fields
        )
    })?;

    Ok(response
        .table
        .data
        .iter()
        .filter_map(|row| columns.parse_row(row, Market::Twse, date))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "stat": "OK",
        "date": "20240502",
        "fields": ["證券代號", "證券名稱", "外陸資買進股數(不含外資自營商)", "外陸資賣出股數(不含外資自營商)",
                   "外陸資買賣超股數(不含外資自營商)", "外資自營商買進股數", "外資自營商賣出股數", "外資自營商買賣超股數",
                   "投信買進股數", "投信賣出股數", "投信買賣超股數", "自營商買賣超股數",
                   "自營商買進股數(自行買賣)", "自營商賣出股數(自行買賣)", "自營商買賣超股數(自行買賣)", "三大法人買賣超股數"],
        "data": [
            ["2330", "台積電          ", "10,000", "4,000", "6,000", "0", "0", "1,000", "3,000", "1,000", "2,000", "-500", "0", "500", "-500", "8,500"],
            ["00679B", "元大美債20年", "1", "0", "1", "0", "0", "0", "0", "0", "0", "0", "0", "0", "0", "1"],
            ["030001", "權證", "1", "0", "1", "0", "0", "0", "0", "0", "0", "0", "0", "0", "0", "1"]
        ]
    }"#;

    #[test]
    fn test_parse() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let flows = parse(BODY, date).unwrap();

        assert_eq!(flows.len(), 2);
        let tsmc = &flows[0];
        assert_eq!(tsmc.code, "2330");
        assert_eq!(tsmc.name, "台積電");
        assert_eq!(tsmc.market, Market::Twse);
        assert_eq!(tsmc.foreign_net, 7_000);
        assert_eq!(tsmc.trust_net, 2_000);
        assert_eq!(tsmc.dealer_net, -500);
        assert_eq!(flows[1].code, "00679B");
    }

    #[test]
    fn test_parse_holiday() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 4).unwrap();
        let body = r#"{"stat":"很抱歉，沒有符合條件的資料!","total":0}"#;

        assert!(parse(body, date).unwrap().is_empty());
    }

    #[test]
    fn test_parse_missing_fields() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let body = r#"{"stat":"OK","fields":["證券代號"],"data":[["2330"]]}"#;

        assert!(parse(body, date).is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match visit(date).await {
            Ok(flows) => logging::debug_file_async(format!("flows:{:#?}", flows.first())),
            Err(why) => logging::error_file_async(format!("Failed to visit because {:?}", why)),
        }
    }
}
