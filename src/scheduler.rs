use std::future::Future;

use anyhow::{Error, Result};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::{cache::SHARE, config, event, logging};

/// 啟動排程
pub async fn start(sched: &JobScheduler) -> Result<()> {
    let etl_cron = config::SETTINGS.etl.cron.trim().to_string();
    //                 sec  min   hour   day of month   month   day of week
    // UTC 時間
    let mut jobs = vec![
        // 02:00 重新載入股票快取
        create_job("0 0 2 * * *", refresh_cache),
    ];

    if etl_cron.is_empty() {
        logging::info_file_async("ETL_CRON is empty, institutional ETL is not scheduled".to_string());
    } else {
        // 預設週一到週五 10:30 執行法人持股比例 ETL
        jobs.push(create_job(&etl_cron, event::taiwan_stock::institutional::execute));
    }

    let broker_cron = config::SETTINGS.broker.cron.trim().to_string();
    if broker_cron.is_empty() {
        logging::info_file_async("BROKER_CRON is empty, broker ETL is not scheduled".to_string());
    } else {
        // 預設週一到週五 11:00 執行券商分點 ETL
        jobs.push(create_job(&broker_cron, event::taiwan_stock::broker::execute));
    }

    for job in jobs.into_iter().flatten() {
        sched.add(job).await?;
    }

    sched.start().await?;

    Ok(())
}

async fn refresh_cache() -> Result<()> {
    SHARE.load().await;
    Ok(())
}

fn create_job<F, Fut>(cron_expr: &str, task: F) -> Result<Job>
where
    F: Fn() -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send,
{
    let expr = cron_expr.to_string();
    let job = Job::new_async(cron_expr, move |_uuid, _l| {
        let task = task.clone();
        let expr = expr.clone();
        Box::pin(async move {
            if let Err(why) = task().await {
                logging::error_file_async(format!(
                    "Failed to execute task({}) because {:?}",
                    expr, why
                ));
            }
        })
    });

    job.map_err(|why| {
        logging::error_file_async(format!("Invalid cron expression({}) because {:?}", cron_expr, why));
        Error::from(why)
    })
}
