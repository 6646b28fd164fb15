//! 非同步檔案日誌。
//!
//! 呼叫端只把訊息丟進 channel，由背景執行緒批次寫入 `log/` 下依日期與大小輪轉的檔案。

use std::{
    fmt,
    sync::mpsc::{self, Receiver, Sender},
    thread,
};

use chrono::{DateTime, Local};
use concat_string::concat_string;
use once_cell::sync::Lazy;

pub mod rotate;

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("app"));

/// 單次寫入檔案前累積的最大位元組數
const BATCH_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "Debug",
            Level::Info => "Info",
            Level::Warn => "Warn",
            Level::Error => "Error",
        })
    }
}

struct LogMessage {
    level: Level,
    msg: String,
    created_at: DateTime<Local>,
}

/// 具名的日誌，每個名稱寫到各自的檔案，例︰log/2025-02-03-http.log
pub struct Logger {
    writer: Sender<LogMessage>,
}

impl Logger {
    pub fn new(log_name: &str) -> Self {
        let (tx, rx) = mpsc::channel::<LogMessage>();
        let pattern = format!("log/%Y-%m-%d-{}.log", log_name);

        // 寫入檔案的操作使用另一個線程處理
        let spawned = thread::Builder::new()
            .name(format!("logger-{}", log_name))
            .spawn(move || write_loop(rx, rotate::Rotate::new(pattern)));

        if let Err(why) = spawned {
            error_console(format!("Failed to spawn logger thread because {:?}", why));
        }

        Logger { writer: tx }
    }

    pub fn debug(&self, log: String) {
        self.send(Level::Debug, log);
    }

    pub fn info(&self, log: String) {
        self.send(Level::Info, log);
    }

    pub fn warn(&self, log: String) {
        self.send(Level::Warn, log);
    }

    pub fn error(&self, log: String) {
        self.send(Level::Error, log);
    }

    fn send(&self, level: Level, msg: String) {
        let message = LogMessage {
            level,
            msg,
            created_at: Local::now(),
        };

        if let Err(why) = self.writer.send(message) {
            error_console(format!("{} {}", why, why.0.msg));
        }
    }
}

fn write_loop(rx: Receiver<LogMessage>, mut rotate: rotate::Rotate) {
    let mut batch = String::with_capacity(BATCH_BYTES);

    while let Ok(received) = rx.recv() {
        append_line(&mut batch, &received);

        // 把目前已在 channel 中的訊息一併寫出
        while batch.len() < BATCH_BYTES {
            match rx.try_recv() {
                Ok(next) => append_line(&mut batch, &next),
                Err(_) => break,
            }
        }

        if let Err(why) = rotate.write_msg(received.created_at, batch.as_bytes()) {
            error_console(format!("Failed to write log because {:?}", why));
            info_console(batch.clone());
        }

        batch.clear();
    }
}

fn append_line(batch: &mut String, message: &LogMessage) {
    batch.push_str(&concat_string!(
        message.created_at.format("%F %X%.6f").to_string(),
        " ",
        message.level.to_string(),
        " ",
        message.msg,
        "\r\n"
    ));
}

pub fn debug_file_async(log: String) {
    LOGGER.debug(log);
}

pub fn info_file_async(log: String) {
    LOGGER.info(log);
}

pub fn warn_file_async(log: String) {
    LOGGER.warn(log);
}

pub fn error_file_async(log: String) {
    LOGGER.error(log);
}

pub fn info_console(log: String) {
    println!(
        "{} Info {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        log
    );
}

pub fn error_console(log: String) {
    eprintln!(
        "{} Error {}",
        Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
        log
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_line() {
        let mut batch = String::new();
        let message = LogMessage {
            level: Level::Warn,
            msg: "2330 缺少發行股數".to_string(),
            created_at: Local::now(),
        };
        append_line(&mut batch, &message);

        assert!(batch.ends_with(" Warn 2330 缺少發行股數\r\n"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_file_async() {
        info_file_async("開始 test_file_async".to_string());
        warn_file_async("warn".to_string());
        error_file_async("error".to_string());
        debug_file_async("結束 test_file_async".to_string());
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
