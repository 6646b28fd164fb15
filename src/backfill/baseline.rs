//! 投信、自營商基準持股的 CSV 載入。
//!
//! 檔案格式︰
//! ```text
//! date,code,trust_shares_base,dealer_shares_base
//! # 以 # 開頭的行為註解
//! 2024-05-02,2330,123456000,7890000
//! ```

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, Trim};
use serde::Deserialize;

use crate::{
    cache::SHARE,
    crawler::normalize_code,
    database::table::{institutional_baseline::InstitutionalBaseline, stock::Stock},
    logging,
    util::{datetime, text},
};

#[derive(Deserialize, Debug)]
struct RawBaseline {
    date: String,
    code: String,
    trust_shares_base: String,
    dealer_shares_base: String,
}

/// CSV 中的一筆基準持股
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineRow {
    pub baseline_date: NaiveDate,
    pub code: String,
    pub trust_shares_base: i64,
    pub dealer_shares_base: i64,
}

impl TryFrom<RawBaseline> for BaselineRow {
    type Error = anyhow::Error;

    fn try_from(raw: RawBaseline) -> Result<Self> {
        Ok(BaselineRow {
            baseline_date: datetime::parse_date(&raw.date)
                .ok_or_else(|| anyhow!("invalid date '{}'", raw.date))?,
            code: normalize_code(&raw.code).ok_or_else(|| anyhow!("invalid code '{}'", raw.code))?,
            trust_shares_base: text::parse_i64(&raw.trust_shares_base, None)?,
            dealer_shares_base: text::parse_i64(&raw.dealer_shares_base, None)?,
        })
    }
}

/// 解析 CSV 內容，格式錯誤的資料列略過並記錄警告
pub fn parse_baseline_csv(content: &str) -> Vec<BaselineRow> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    reader
        .deserialize::<RawBaseline>()
        .enumerate()
        .filter_map(|(index, record)| {
            let row = record
                .map_err(|why| anyhow!("{:?}", why))
                .and_then(BaselineRow::try_from);
            match row {
                Ok(row) => Some(row),
                Err(why) => {
                    logging::warn_file_async(format!(
                        "Skip baseline record {} because {}",
                        index + 1,
                        why
                    ));
                    None
                }
            }
        })
        .collect()
}

/// 讀取基準持股檔並寫入資料庫，檔案不存在時回傳 0
pub async fn execute(path: &str) -> Result<usize> {
    if !Path::new(path).exists() {
        logging::info_file_async(format!("baseline file {} does not exist, skipped", path));
        return Ok(0);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .context(format!("Failed to read baseline file {}", path))?;
    let rows = parse_baseline_csv(&content);
    let mut baselines = Vec::with_capacity(rows.len());

    for row in rows {
        match stock_id(&row.code).await {
            Some(stock_id) => baselines.push(InstitutionalBaseline {
                stock_id,
                baseline_date: row.baseline_date,
                trust_shares_base: row.trust_shares_base,
                dealer_shares_base: row.dealer_shares_base,
            }),
            None => logging::warn_file_async(format!(
                "Skip baseline of unknown stock {} on {}",
                row.code, row.baseline_date
            )),
        }
    }

    if baselines.is_empty() {
        return Ok(0);
    }

    InstitutionalBaseline::upsert_batch(&baselines).await?;

    Ok(baselines.len())
}

async fn stock_id(code: &str) -> Option<i32> {
    if let Some(stock) = SHARE.get_stock(code) {
        return Some(stock.id);
    }

    match Stock::fetch_by_code(code).await {
        Ok(stock) => stock.map(|s| s.id),
        Err(why) => {
            logging::error_file_async(format!("{:?}", why));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_baseline_csv() {
        let content = "date,code,trust_shares_base,dealer_shares_base\n\
# 2024 年第一季申報\n\
2024-05-02,2330,\"123,456,000\",7890000\n\
20240503, 6488 ,100,-20\n\
2024-13-01,2330,1,1\n\
2024-05-02,030001,1,1\n\
2024-05-02,2317,abc,1\n";
        let rows = parse_baseline_csv(content);

        assert_eq!(
            rows,
            vec![
                BaselineRow {
                    baseline_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
                    code: "2330".to_string(),
                    trust_shares_base: 123_456_000,
                    dealer_shares_base: 7_890_000,
                },
                BaselineRow {
                    baseline_date: NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
                    code: "6488".to_string(),
                    trust_shares_base: 100,
                    dealer_shares_base: -20,
                },
            ]
        );
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(parse_baseline_csv("").is_empty());
        assert!(parse_baseline_csv("date,code,trust_shares_base,dealer_shares_base\n").is_empty());
    }

    #[tokio::test]
    async fn test_execute_missing_file() {
        assert_eq!(execute("data/does-not-exist.csv").await.unwrap(), 0);
    }
}
