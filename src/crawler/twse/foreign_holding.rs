use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    crawler::{twse, FetchedForeignHolding, FieldTable, HoldingColumns},
    declare::Market,
    logging,
    util::http,
};

#[derive(Deserialize, Debug)]
struct QfiisResponse {
    stat: Option<String>,
    #[serde(flatten)]
    table: FieldTable,
}

/// 抓取上市股票外資及陸資投資持股統計(MI_QFIIS)
pub async fn visit(date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
    let url = format!(
        "https://www.{}/rwd/zh/fund/MI_QFIIS?date={}&selectType=ALLBUT0999&response=json",
        twse::HOST,
        date.format("%Y%m%d")
    );
    let body = http::get(&url, None).await?;

    parse(&body, date)
}

pub fn parse(body: &str, date: NaiveDate) -> Result<Vec<FetchedForeignHolding>> {
    let response: QfiisResponse = serde_json::from_str(body)
        .map_err(|why| anyhow!("Failed to parse MI_QFIIS({}) because {:?}", date, why))?;

    if !twse::is_ok(response.stat.as_deref()) || response.table.data.is_empty() {
        logging::info_file_async(format!(
            "MI_QFIIS has no data on {}: {:?}",
            date, response.stat
        ));
        return Ok(Vec::new());
    }

    let columns = HoldingColumns::locate(&response.table.fields).ok_or_else(|| {
        anyhow!(
            "MI_QFIIS({}) is missing required fields: {:?}",
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
