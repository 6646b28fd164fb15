pub mod backfill;
pub mod cache;
pub mod calculation;
pub mod config;
pub mod crawler;
pub mod database;
pub mod declare;
pub mod error;
pub mod event;
pub mod logging;
pub mod scheduler;
pub mod util;
pub mod web;

use anyhow::{anyhow, Result};
use tokio_cron_scheduler::JobScheduler;

use crate::cache::SHARE;

#[cfg(all(target_os = "linux", target_env = "musl"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        logging::error_console("rustls crypto provider was already installed".to_string());
    }

    database::init()?;
    database::migrate().await?;
    SHARE.load().await;

    // `institutional_tracker etl` 或 `broker` 只執行一次對應的 ETL 後結束
    match std::env::args().nth(1).as_deref() {
        Some("etl") => return event::taiwan_stock::institutional::execute().await,
        Some("broker") => return event::taiwan_stock::broker::execute().await,
        _ => {}
    }

    let sched = JobScheduler::new()
        .await
        .map_err(|why| anyhow!("Failed to JobScheduler::new because {:?}", why))?;
    scheduler::start(&sched).await?;

    let port = config::SETTINGS.system.http_port;
    if port == 0 {
        logging::info_console("SYSTEM_HTTP_PORT is 0, REST API is disabled".to_string());
        tokio::signal::ctrl_c().await?;
        return Ok(());
    }

    web::serve(port).await
}
