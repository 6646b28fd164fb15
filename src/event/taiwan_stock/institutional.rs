//! 每日法人持股比例 ETL︰抓取 → 寫入 → 重新計算。
//!
//! 整個流程可重複執行，所有寫入皆以自然鍵 upsert。

use std::fmt;

use anyhow::Result;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::{
    backfill::{baseline, foreign_holding, institutional_flow, quote},
    calculation::{institutional_ratio, record::Security},
    config,
    database::{
        store::PgRatioStore,
        table::{
            foreign_holding::ForeignHolding,
            institutional_flow::InstitutionalFlow,
            stock::Stock,
            stock_price::StockPrice,
            system_status::{SystemStatus, ETL_STATUS},
        },
    },
    logging,
    util::datetime,
};

/// 同一時間只允許一個 ETL 在執行
static RUNNING: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// 單次 ETL 的統計
#[derive(Debug, Default, Clone)]
pub struct EtlReport {
    pub target_date: Option<NaiveDate>,
    pub flows: usize,
    pub foreign_holdings: usize,
    pub prices: usize,
    pub baselines: usize,
    pub securities: usize,
    pub ratios: usize,
    pub missing_denominator: usize,
    pub failures: usize,
}

impl fmt::Display for EtlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target={} flows={} foreign_holdings={} prices={} baselines={} securities={} ratios={} missing_denominator={} failures={}",
            self.target_date.map(|d| d.to_string()).unwrap_or_default(),
            self.flows,
            self.foreign_holdings,
            self.prices,
            self.baselines,
            self.securities,
            self.ratios,
            self.missing_denominator,
            self.failures
        )
    }
}

/// 執行一次 ETL，並將狀態寫入 `system_status`
pub async fn execute() -> Result<()> {
    let Ok(_guard) = RUNNING.try_lock() else {
        logging::warn_file_async("institutional ETL is already running, skipped".to_string());
        return Ok(());
    };

    let target = datetime::previous_weekday(datetime::taipei_today());
    logging::info_file_async(format!("法人持股比例 ETL 開始，目標日 {}", target));
    SystemStatus::mark_running(ETL_STATUS).await?;

    match run(target).await {
        Ok(report) => {
            let message = report.to_string();
            logging::info_file_async(format!("法人持股比例 ETL 完成 {}", message));
            SystemStatus::mark_completed(ETL_STATUS, &message).await
        }
        Err(why) => {
            let message = format!("{:?}", why);
            logging::error_file_async(format!("Failed to run institutional ETL because {}", message));
            SystemStatus::mark_error(ETL_STATUS, &message).await?;
            Err(why)
        }
    }
}

async fn run(target: NaiveDate) -> Result<EtlReport> {
    let settings = &config::SETTINGS.etl;
    let mut report = EtlReport {
        target_date: Some(target),
        ..Default::default()
    };

    let flow_dates = pending_dates(
        InstitutionalFlow::fetch_last_trade_date().await?,
        target,
        settings.initial_backfill_days,
    );
    report.flows = institutional_flow::execute_range(flow_dates, settings.concurrency).await;

    let holding_dates = pending_dates(
        ForeignHolding::fetch_last_trade_date().await?,
        target,
        settings.initial_backfill_days,
    );
    report.foreign_holdings =
        foreign_holding::execute_range(holding_dates, target, settings.concurrency).await;

    let price_dates = pending_dates(
        StockPrice::fetch_last_trade_date().await?,
        target,
        settings.initial_backfill_days,
    );
    let needs_latest = price_dates.contains(&target);
    report.prices = quote::execute_range(price_dates, settings.concurrency).await;

    // 依日期查詢沒有寫入任何一筆時，改抓最近一個交易日的行情
    if report.prices == 0 && needs_latest {
        report.prices = quote::execute(target).await.unwrap_or_else(|why| {
            logging::error_file_async(format!("Failed to backfill quotes because {:?}", why));
            0
        });
    }

    report.baselines = baseline::execute(&settings.baseline_path)
        .await
        .unwrap_or_else(|why| {
            logging::error_file_async(format!("Failed to load baselines because {:?}", why));
            0
        });

    let securities: Vec<Security> = Stock::fetch_with_flows()
        .await?
        .iter()
        .filter_map(Stock::to_security)
        .collect();
    let summary = institutional_ratio::recompute(&PgRatioStore, securities).await;

    for failure in &summary.failures {
        logging::error_file_async(format!("Failed to recompute ratios: {}", failure));
    }

    report.securities = summary.securities;
    report.ratios = summary.rows;
    report.missing_denominator = summary.missing_denominator;
    report.failures = summary.failures.len();

    Ok(report)
}

/// 等待執行中的 ETL 結束，沒有執行中的 ETL 時立即返回
pub async fn wait_idle() {
    let _guard = RUNNING.lock().await;
}

/// 需要抓取的平日。
///
/// 已有資料時從最後一天的隔天開始，沒有資料時從目標日往前 `initial_days` 天開始。
pub fn pending_dates(last_stored: Option<NaiveDate>, target: NaiveDate, initial_days: u64) -> Vec<NaiveDate> {
    let start = match last_stored {
        Some(last) => match last.succ_opt() {
            Some(next) => next,
            None => return Vec::new(),
        },
        None => datetime::days_before(target, initial_days),
    };

    datetime::weekdays_between(start, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_pending_dates_continues_after_last_stored() {
        // 2024-05-03 是星期五
        let dates = pending_dates(Some(ymd(2024, 5, 2)), ymd(2024, 5, 7), 60);
        assert_eq!(dates, vec![ymd(2024, 5, 3), ymd(2024, 5, 6), ymd(2024, 5, 7)]);
    }

    #[test]
    fn test_pending_dates_up_to_date() {
        assert!(pending_dates(Some(ymd(2024, 5, 7)), ymd(2024, 5, 7), 60).is_empty());
    }

    #[test]
    fn test_pending_dates_initial_backfill() {
        let dates = pending_dates(None, ymd(2024, 5, 10), 7);
        assert_eq!(dates.first(), Some(&ymd(2024, 5, 3)));
        assert_eq!(dates.last(), Some(&ymd(2024, 5, 10)));
        assert_eq!(dates.len(), 6);
    }

    #[test]
    fn test_report_display() {
        let report = EtlReport {
            target_date: Some(ymd(2024, 5, 2)),
            flows: 1800,
            ..Default::default()
        };

        assert!(report.to_string().starts_with("target=2024-05-02 flows=1800 "));
    }

    #[tokio::test]
    #[ignore]
    async fn test_execute() {
        dotenv::dotenv().ok();
        crate::cache::SHARE.load().await;
        match execute().await {
            Ok(_) => logging::debug_file_async("ETL 完成".to_string()),
            Err(why) => logging::error_file_async(format!("Failed to execute because {:?}", why)),
        }
    }
}
