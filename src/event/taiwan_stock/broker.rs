//! 每日券商分點進出 ETL，只追蹤設定中的股票。

use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use crate::{
    backfill::broker_trade,
    config,
    database::table::{
        broker_trade::BrokerTrade,
        system_status::{SystemStatus, BROKER_STATUS},
    },
    event::taiwan_stock::institutional,
    logging,
    util::datetime,
};

static RUNNING: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// 執行一次券商分點 ETL，並將狀態寫入 `system_status`
pub async fn execute() -> Result<()> {
    let Ok(_guard) = RUNNING.try_lock() else {
        logging::warn_file_async("broker ETL is already running, skipped".to_string());
        return Ok(());
    };

    let settings = &config::SETTINGS.broker;
    if settings.codes.is_empty() {
        logging::info_file_async("BROKER_CODES is empty, broker ETL is skipped".to_string());
        return Ok(());
    }

    // 與法人 ETL 共用上游網站，錯開執行
    institutional::wait_idle().await;

    let target = datetime::previous_weekday(datetime::taipei_today());
    logging::info_file_async(format!("券商分點 ETL 開始，目標日 {}", target));
    SystemStatus::mark_running(BROKER_STATUS).await?;

    match run(target).await {
        Ok(count) => {
            let message = format!("target={} trades={}", target, count);
            logging::info_file_async(format!("券商分點 ETL 完成 {}", message));
            SystemStatus::mark_completed(BROKER_STATUS, &message).await
        }
        Err(why) => {
            let message = format!("{:?}", why);
            logging::error_file_async(format!("Failed to run broker ETL because {}", message));
            SystemStatus::mark_error(BROKER_STATUS, &message).await?;
            Err(why)
        }
    }
}

async fn run(target: NaiveDate) -> Result<usize> {
    let settings = &config::SETTINGS.broker;
    let dates = institutional::pending_dates(
        BrokerTrade::fetch_last_trade_date().await?,
        target,
        settings.initial_backfill_days,
    );

    if dates.is_empty() {
        return Ok(0);
    }

    Ok(broker_trade::execute_range(
        &settings.codes,
        dates,
        target,
        Duration::from_millis(settings.delay_ms),
    )
    .await)
}
