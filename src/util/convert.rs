use rust_decimal::Decimal;

use crate::util::text;

/// 上游表格欄位的型態轉換，沒有資料時回傳 `None` 而不是零
pub trait FromValue {
    fn get_text(&self) -> String;
    fn get_optional_i64(&self) -> Option<i64>;
    fn get_optional_decimal(&self) -> Option<Decimal>;
}

/// 為  serde_json::Value 實作指定型態的轉換
impl FromValue for serde_json::Value {
    fn get_text(&self) -> String {
        match self {
            serde_json::Value::String(v) => v.trim().to_string(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn get_optional_i64(&self) -> Option<i64> {
        match self {
            serde_json::Value::Number(n) => n.as_i64(),
            other => text::parse_optional_i64(&other.get_text()),
        }
    }

    fn get_optional_decimal(&self) -> Option<Decimal> {
        text::parse_optional_decimal(&self.get_text())
    }
}

/// 為  String 實作指定型態的轉換
impl FromValue for String {
    fn get_text(&self) -> String {
        self.trim().to_string()
    }

    fn get_optional_i64(&self) -> Option<i64> {
        text::parse_optional_i64(self)
    }

    fn get_optional_decimal(&self) -> Option<Decimal> {
        text::parse_optional_decimal(self)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_json_value() {
        assert_eq!(json!(" 2330 ").get_text(), "2330");
        assert_eq!(json!("1,234,567").get_optional_i64(), Some(1_234_567));
        assert_eq!(json!(-42).get_optional_i64(), Some(-42));
        assert_eq!(json!("--").get_optional_i64(), None);
        assert_eq!(json!(null).get_optional_decimal(), None);
        assert_eq!(json!("72.15").get_optional_decimal(), Some(dec!(72.15)));
        assert_eq!(json!(1.5).get_optional_decimal(), Some(dec!(1.5)));
    }

    #[test]
    fn test_string() {
        assert_eq!("(500)".to_string().get_optional_i64(), Some(-500));
        assert_eq!("".to_string().get_optional_decimal(), None);
    }
}
