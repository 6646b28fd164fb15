use std::str::FromStr;

use anyhow::{anyhow, Result};
use rust_decimal::{prelude::ToPrimitive, Decimal};

const NUMBER_ESCAPE_CHAR: &[char] = &['元', '%', ',', ' ', '"', '\n', '\r', '\t', '\u{3000}'];

/// 上游用來表示「沒有資料」的字串
const EMPTY_MARKS: &[&str] = &["", "-", "--", "---", "N/A", "NA", "X", "null", "None"];

/// 將 Big5 編碼的內容轉成 UTF-8 字串
pub fn big5_2_utf8(data: &[u8]) -> Result<String> {
    let (text, _, had_errors) = encoding_rs::BIG5.decode(data);
    if had_errors && text.is_empty() {
        return Err(anyhow!("Failed to decode {} bytes as BIG5", data.len()));
    }

    Ok(text.into_owned())
}

/// 移除數字字串中的千分位、單位等字元
pub fn clean_escape_chars(s: &str, escape_chars: Option<Vec<char>>) -> String {
    let chars = escape_chars.unwrap_or_else(|| NUMBER_ESCAPE_CHAR.to_vec());
    s.chars().filter(|c| !chars.contains(c)).collect()
}

/// 將字串轉成 i64，例︰"1,234" => 1234
pub fn parse_i64(s: &str, escape_chars: Option<Vec<char>>) -> Result<i64> {
    let cleaned = clean_escape_chars(s, escape_chars);
    cleaned
        .parse::<i64>()
        .map_err(|why| anyhow!("Failed to parse '{}' as i64 because {:?}", cleaned, why))
}

/// 正規化上游的數字字串，沒有資料時回傳 `None`。
///
/// 括號與全形負號都視為負數，例︰"(1,234)"、"－1,234"、"−1,234" => "-1234"
fn normalize_number(s: &str) -> Option<String> {
    let trimmed = s.trim().trim_matches('"').trim();
    if EMPTY_MARKS.iter().any(|mark| trimmed.eq_ignore_ascii_case(mark)) {
        return None;
    }

    let mut negative = false;
    let mut body = trimmed;

    if body.starts_with('(') && body.ends_with(')') && body.len() > 2 {
        negative = true;
        body = &body[1..body.len() - 1];
    }

    let mut cleaned = clean_escape_chars(body, None)
        .replace(['－', '−', '–'], "-")
        .replace('＋', "+");

    if let Some(rest) = cleaned.strip_prefix('+') {
        cleaned = rest.to_string();
    }

    if negative && !cleaned.starts_with('-') {
        cleaned.insert(0, '-');
    }

    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }

    Some(cleaned)
}

/// 解析可能帶正負號的數字，無法解析或為空值時回傳 `None`
pub fn parse_optional_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(&normalize_number(s)?).ok()
}

/// 解析股數等整數，允許 "1,234.00" 這種寫法
pub fn parse_optional_i64(s: &str) -> Option<i64> {
    let cleaned = normalize_number(s)?;
    match cleaned.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => Decimal::from_str(&cleaned).ok()?.trunc().to_i64(),
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_parse_i64() {
        assert_eq!(parse_i64("25,930,380,458", None).unwrap(), 25_930_380_458);
        assert!(parse_i64("1.5", None).is_err());
    }

    #[test]
    fn test_parse_optional_signed_numbers() {
        assert_eq!(parse_optional_i64("1,234"), Some(1234));
        assert_eq!(parse_optional_i64("-1,234"), Some(-1234));
        assert_eq!(parse_optional_i64("(1,234)"), Some(-1234));
        assert_eq!(parse_optional_i64("－5,000"), Some(-5000));
        assert_eq!(parse_optional_i64("−7"), Some(-7));
        assert_eq!(parse_optional_i64("+88"), Some(88));
        assert_eq!(parse_optional_i64("\"3,000\""), Some(3000));
        assert_eq!(parse_optional_i64("1,000.00"), Some(1000));
        assert_eq!(parse_optional_i64("--"), None);
        assert_eq!(parse_optional_i64(""), None);
        assert_eq!(parse_optional_i64("N/A"), None);
        assert_eq!(parse_optional_i64("abc"), None);
    }

    #[test]
    fn test_parse_optional_decimal() {
        assert_eq!(parse_optional_decimal("75.31%"), Some(dec!(75.31)));
        assert_eq!(parse_optional_decimal(" -0.45 "), Some(dec!(-0.45)));
        assert_eq!(parse_optional_decimal("X"), None);
    }

    #[test]
    fn test_big5_2_utf8() {
        let (bytes, _, _) = encoding_rs::BIG5.encode("台積電");
        assert_eq!(big5_2_utf8(&bytes).unwrap(), "台積電");
    }
}
