use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    crawler::{tpex, FetchedFlow, FieldTable, FlowColumns},
    declare::Market,
    logging,
    util::{datetime, http},
};

#[derive(Deserialize, Debug)]
struct HedgeResponse {
    #[serde(default)]
    tables: Vec<FieldTable>,
}

/// 抓取上櫃股票三大法人買賣明細
pub async fn visit(date: NaiveDate) -> Result<Vec<FetchedFlow>> {
    let url = format!(
        "https://www.{}/web/stock/3insti/daily_trade/3itrade_hedge_result.php?l=zh-tw&o=json&se=EW&t=D&d={}",
        tpex::HOST,
        datetime::to_roc_date(date)
    );
    let body = http::get(&url, None).await?;

    parse(&body, date)
}

/// 解析 `tables[].{fields, data}`，沒有任何資料列時視為休市
pub fn parse(body: &str, date: NaiveDate) -> Result<Vec<FetchedFlow>> {
    let response: HedgeResponse = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse 3itrade_hedge_result({}) because {:?}", date, why))?;

    let Some(table) = response.tables.into_iter().find(|t| !t.data.is_empty()) else {
        logging::info_file_async(format!("3itrade_hedge_result has no data on {}", date));
        return Ok(Vec::new());
    };

    let columns = FlowColumns::locate(&table.fields).ok_or_else(|| {
        anyhow!(
            "3itrade_hedge_result({}) is missing required fields: {:?}",
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
