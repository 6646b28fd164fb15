use anyhow::{anyhow, Result};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};

use crate::{
    crawler::{fbs, normalize_code},
    declare::BrokerSide,
    util::{http, text},
};

/// 分點連結中的券商代碼，例︰`zco0.djhtm?a=2330&b=0039004100390052`
static BROKER_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[?&]b=([^&#]+)").ok());
static FULL_DATE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(\d{4})[/-](\d{1,2})[/-](\d{1,2})").ok());
static SHORT_DATE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d{1,2})/(\d{1,2})").ok());

/// 單一券商分點在一檔股票的進出
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBrokerTrade {
    pub code: String,
    pub trade_date: NaiveDate,
    pub broker_name: String,
    pub broker_id: Option<String>,
    /// 單位︰張
    pub buy_vol: i64,
    pub sell_vol: i64,
    /// 賣超方一律為負數
    pub net_vol: i64,
    /// 佔成交比重(%)
    pub pct: Option<Decimal>,
    /// 表格中的列次，買超與賣超同列共用名次
    pub rank: i32,
    pub side: BrokerSide,
}

/// 抓取指定日期的主力進出
pub async fn visit(code: &str, date: NaiveDate) -> Result<Vec<FetchedBrokerTrade>> {
    let day = date.format("%Y-%-m-%-d");
    let url = format!(
        "https://{}/z/zc/zco/zco.djhtm?a={}&e={}&f={}",
        fbs::HOST,
        code,
        day,
        day
    );
    let body = http::get_utf8_or_big5(&url).await?;

    parse(&body, code, date)
}

/// 抓取最近一個交易日的主力進出，頁面上沒有日期時使用 `reference`
pub async fn visit_latest(code: &str, reference: NaiveDate) -> Result<Vec<FetchedBrokerTrade>> {
    let url = format!("https://{}/z/zc/zco/zco_{}.djhtm", fbs::HOST, code);
    let body = http::get_utf8_or_big5(&url).await?;

    parse(&body, code, reference)
}

/// 解析 `table.t01`，表頭為「買超券商 … 賣超券商 …」共 10 欄。
///
/// 資料日期取自表頭之前的標題列，找不到時使用 `reference`。
pub fn parse(body: &str, code: &str, reference: NaiveDate) -> Result<Vec<FetchedBrokerTrade>> {
    let code = normalize_code(code).ok_or_else(|| anyhow!("Invalid security code {}", code))?;
    let document = Html::parse_document(body);
    let row_selector = selector("table.t01 tr")?;
    let cell_selector = selector("td")?;
    let link_selector = selector("a")?;

    let rows: Vec<ElementRef> = document.select(&row_selector).collect();
    let Some(header) = rows.iter().position(|row| {
        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();
        cells.len() >= 10 && cells[0].contains("買超券商") && cells[5].contains("賣超券商")
    }) else {
        return Ok(Vec::new());
    };

    let trade_date = rows[..header]
        .iter()
        .find_map(|row| resolve_date(&cell_text(*row), reference))
        .unwrap_or(reference);

    let mut trades = Vec::with_capacity(60);
    let mut rank = 0;

    for row in &rows[header + 1..] {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        if cells.len() < 10 {
            continue;
        }

        rank += 1;
        for (side, offset) in [(BrokerSide::Buy, 0), (BrokerSide::Sell, 5)] {
            let Some((broker_name, broker_id)) = broker(&cells[offset], &link_selector) else {
                continue;
            };
            let number = |index: usize| {
                text::parse_optional_i64(&cell_text(cells[offset + index])).unwrap_or(0)
            };
            let net = number(3);

            trades.push(FetchedBrokerTrade {
                code: code.to_string(),
                trade_date,
                broker_name,
                broker_id,
                buy_vol: number(1),
                sell_vol: number(2),
                net_vol: match side {
                    BrokerSide::Buy => net,
                    BrokerSide::Sell => -net.abs(),
                },
                pct: text::parse_optional_decimal(&cell_text(cells[offset + 4])),
                rank,
                side,
            });
        }
    }

    Ok(trades)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|why| anyhow!("Failed to Selector::parse({}) because: {:?}", css, why))
}

fn cell_text(element: ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// 券商名稱與代碼，空白格與合計列回傳 `None`
fn broker(cell: &ElementRef, link_selector: &Selector) -> Option<(String, Option<String>)> {
    let link = cell.select(link_selector).next();
    let name = link.map(cell_text).unwrap_or_else(|| cell_text(*cell));

    if name.is_empty() || name.starts_with("合計") || name.starts_with("平均") {
        return None;
    }

    let broker_id = link
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| BROKER_ID.as_ref()?.captures(href))
        .map(|caps| caps[1].to_string());

    Some((name, broker_id))
}

/// 頁面上的資料日期，只有月/日時取不晚於 `reference` 的那一年
fn resolve_date(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = FULL_DATE.as_ref().and_then(|re| re.captures(text)) {
        return NaiveDate::from_ymd_opt(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
        );
    }

    let caps = SHORT_DATE.as_ref()?.captures(text)?;
    let month: u32 = caps[1].parse().ok()?;
    let day: u32 = caps[2].parse().ok()?;

    match NaiveDate::from_ymd_opt(reference.year(), month, day)? {
        date if date > reference => NaiveDate::from_ymd_opt(reference.year() - 1, month, day),
        date => Some(date),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::logging;

    const PAGE: &str = r#"<html><body>
<table class="t01">
  <tr><td class="t10" colspan="10">台積電(2330) 主力進出 最後更新日：05/02</td></tr>
  <tr>
    <td class="t2">買超券商</td><td>買進</td><td>賣出</td><td>買超</td><td>佔成交比重</td>
    <td class="t2">賣超券商</td><td>買進</td><td>賣出</td><td>賣超</td><td>佔成交比重</td>
  </tr>
  <tr>
    <td><a href="/z/zc/zco/zco0/zco0.djhtm?a=2330&b=0039004100390052&BHID=9600">富邦</a></td>
    <td>1,520</td><td>320</td><td>1,200</td><td>4.25%</td>
    <td><a href="/z/zc/zco/zco0/zco0.djhtm?a=2330&b=1470&BHID=1470">台灣摩根士丹利</a></td>
    <td>210</td><td>2,010</td><td>1,800</td><td>6.12%</td>
  </tr>
  <tr>
    <td>元大</td><td>800</td><td>100</td><td>700</td><td>2.10%</td>
    <td>&nbsp;</td><td></td><td></td><td></td><td></td>
  </tr>
  <tr><td>合計買超張數</td><td>1,900</td><td>合計賣超張數</td><td>1,800</td></tr>
</table>
</body></html>"#;

    #[test]
    fn test_parse() {
        let reference = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let trades = parse(PAGE, "2330", reference).unwrap();

        assert_eq!(trades.len(), 3);
        let buy = &trades[0];
        assert_eq!(buy.trade_date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert_eq!(buy.broker_name, "富邦");
        assert_eq!(buy.broker_id.as_deref(), Some("0039004100390052"));
        assert_eq!(buy.net_vol, 1200);
        assert_eq!(buy.pct, Some(dec!(4.25)));
        assert_eq!(buy.side, BrokerSide::Buy);

        let sell = &trades[1];
        assert_eq!(sell.broker_name, "台灣摩根士丹利");
        assert_eq!(sell.broker_id.as_deref(), Some("1470"));
        assert_eq!(sell.buy_vol, 210);
        assert_eq!(sell.sell_vol, 2010);
        assert_eq!(sell.net_vol, -1800);
        assert_eq!(sell.rank, 1);

        assert_eq!(trades[2].broker_name, "元大");
        assert_eq!(trades[2].broker_id, None);
        assert_eq!(trades[2].rank, 2);
    }

    #[test]
    fn test_parse_without_table() {
        let reference = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        assert!(parse("<html><body>查無資料</body></html>", "2330", reference)
            .unwrap()
            .is_empty());
        assert!(parse(PAGE, "權證", reference).is_err());
    }

    #[test]
    fn test_resolve_date() {
        let reference = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        assert_eq!(
            resolve_date("最後更新日：12/29", reference),
            NaiveDate::from_ymd_opt(2023, 12, 29)
        );
        assert_eq!(
            resolve_date("資料日期 2024/01/02", reference),
            NaiveDate::from_ymd_opt(2024, 1, 2)
        );
        assert_eq!(resolve_date("主力進出", reference), None);
    }

    #[tokio::test]
    #[ignore]
    async fn test_visit() {
        dotenv::dotenv().ok();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        match visit("2330", date).await {
            Ok(list) => logging::debug_file_async(format!("broker trades:{:?}", list)),
            Err(why) => logging::error_file_async(format!("Failed to visit because {:?}", why)),
        }
    }
}
