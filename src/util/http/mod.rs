use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use once_cell::sync::{Lazy, OnceCell};
use reqwest::{header, Client, Method, Response};
use tokio::sync::Semaphore;

use crate::{logging::Logger, util};

/// 限制最多 5 個並發請求，避免被證交所、櫃買中心封鎖。
static SEMAPHORE: Lazy<Semaphore> = Lazy::new(|| Semaphore::new(5));

/// A singleton instance of the reqwest client.
static CLIENT: OnceCell<Client> = OnceCell::new();

static LOGGER: Lazy<Logger> = Lazy::new(|| Logger::new("http"));

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36";

/// HTTP 請求失敗時的最大重試次數。
const MAX_RETRIES: usize = 3;

fn get_client() -> Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            // ===== 壓縮 =====
            .brotli(true)
            .gzip(true)
            .zstd(true)
            // ===== 超時設置 =====
            .connect_timeout(Duration::from_secs(8))
            .timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            // ===== 連接池 =====
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            // ===== Cookie 和重定向 =====
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .referer(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow!("Failed to create reqwest client: {:?}", e))
    })
}

/// GET 並回傳 UTF-8 文字
pub async fn get(url: &str, headers: Option<header::HeaderMap>) -> Result<String> {
    send(Method::GET, url, headers)
        .await?
        .text()
        .await
        .map_err(|e| anyhow!("Error parsing response text: {:?}", e))
}

/// GET 並自動判斷內容為 UTF-8 或 Big5
pub async fn get_utf8_or_big5(url: &str) -> Result<String> {
    let bytes = send(Method::GET, url, None)
        .await?
        .bytes()
        .await
        .map_err(|e| anyhow!("Error reading response body: {:?}", e))?;

    decode_utf8_or_big5(&bytes)
}

/// 內容不是合法的 UTF-8 時改用 Big5 解碼
pub fn decode_utf8_or_big5(bytes: &[u8]) -> Result<String> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(_) => util::text::big5_2_utf8(bytes),
    }
}

/// 發送請求，失敗時以指數遞增的間隔重試 `MAX_RETRIES` 次
async fn send(method: Method, url: &str, headers: Option<header::HeaderMap>) -> Result<Response> {
    let visit_log = format!("{method}:{url}");
    let client = get_client()?;
    let mut rb = client.request(method, url);
    let mut last_error = String::new();

    if let Some(h) = headers {
        rb = rb.headers(h);
    }

    for attempt in 1..=MAX_RETRIES {
        let msg = format!("Attempt {} to send {}", attempt, visit_log);
        let rb_clone = rb
            .try_clone()
            .ok_or_else(|| anyhow!("Failed to clone RequestBuilder"))?;
        let permit = SEMAPHORE.acquire().await;
        let start = Instant::now();
        let res = rb_clone.send().await.and_then(|r| r.error_for_status());
        let elapsed = start.elapsed().as_millis();

        // 請求延遲，避免被目標網站封禁
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(permit);

        match res {
            Ok(response) => {
                LOGGER.info(format!("{} {} ms", msg, elapsed));
                return Ok(response);
            }
            Err(why) => {
                last_error = format!("{:?}", why);
                LOGGER.error(format!("{} failed because {:?}. {} ms", msg, why, elapsed));
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt as u32))).await;
                }
            }
        }
    }

    Err(anyhow!(
        "Failed to send request to {} after {} attempts; last error: {}",
        url,
        MAX_RETRIES,
        last_error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging;

    #[test]
    fn test_decode_utf8_or_big5() {
        assert_eq!(decode_utf8_or_big5("代號,名稱".as_bytes()).unwrap(), "代號,名稱");
        assert_eq!(
            decode_utf8_or_big5(b"\xEF\xBB\xBF2330").unwrap(),
            "2330"
        );

        let (big5, _, _) = encoding_rs::BIG5.encode("發行股數");
        assert_eq!(decode_utf8_or_big5(&big5).unwrap(), "發行股數");
    }

    #[tokio::test]
    #[ignore]
    async fn test_get() {
        dotenv::dotenv().ok();
        let url = "https://openapi.twse.com.tw/v1/exchangeReport/STOCK_DAY_ALL";
        match get(url, None).await {
            Ok(body) => logging::debug_file_async(format!("body length:{}", body.len())),
            Err(why) => logging::error_file_async(format!("Failed to get because {:?}", why)),
        }
    }
}
