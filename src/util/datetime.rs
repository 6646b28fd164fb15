use chrono::{Datelike, Days, NaiveDate, TimeDelta, Utc, Weekday};

/// 台北時區 UTC+8
const TAIPEI_OFFSET_HOURS: i64 = 8;

/// A trait representing the weekend concept.
pub trait Weekend {
    /// Returns `true` if the date is on a Saturday or Sunday.
    fn is_weekend(&self) -> bool;
}

impl Weekend for NaiveDate {
    fn is_weekend(&self) -> bool {
        matches!(self.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// 台北今天的日期
pub fn taipei_today() -> NaiveDate {
    (Utc::now() + TimeDelta::hours(TAIPEI_OFFSET_HOURS)).date_naive()
}

/// Convert ROC year to Gregorian year.
pub fn to_gregorian_year(year: i32) -> i32 {
    year + 1911
}

/// 西元年轉民國年
pub fn gregorian_year_to_roc_year(year: i32) -> i32 {
    year - 1911
}

/// 民國日期字串，例︰2024-05-02 => "113/05/02"
pub fn to_roc_date(date: NaiveDate) -> String {
    format!(
        "{}/{:02}/{:02}",
        gregorian_year_to_roc_year(date.year()),
        date.month(),
        date.day()
    )
}

/// 解析民國日期，支援 "113/05/02"、"113-05-02" 與 "1130502"
pub fn parse_taiwan_date(date_str: &str) -> Option<NaiveDate> {
    let s = date_str.trim();
    let split_date: Vec<&str> = s.split(['/', '-']).collect();

    let (year, month, day) = if split_date.len() == 3 {
        (
            split_date[0].parse::<i32>().ok()?,
            split_date[1].parse::<u32>().ok()?,
            split_date[2].parse::<u32>().ok()?,
        )
    } else if (6..=7).contains(&s.len()) && s.chars().all(|c| c.is_ascii_digit()) {
        let (y, md) = s.split_at(s.len() - 4);
        (
            y.parse::<i32>().ok()?,
            md[..2].parse::<u32>().ok()?,
            md[2..].parse::<u32>().ok()?,
        )
    } else {
        return None;
    };

    NaiveDate::from_ymd_opt(to_gregorian_year(year), month, day)
}

/// 解析西元日期，支援 "2024-05-02"、"2024/05/02" 與 "20240502"
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let s = date_str.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

/// 早於 `date` 的最近一個平日
pub fn previous_weekday(date: NaiveDate) -> NaiveDate {
    let mut d = date.pred_opt().unwrap_or(date);
    while d.is_weekend() {
        d = match d.pred_opt() {
            Some(p) => p,
            None => break,
        };
    }

    d
}

/// `start` 到 `end` (含)之間的所有平日
pub fn weekdays_between(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !d.is_weekend())
        .collect()
}

/// `date` 往前 `days` 個日曆天
pub fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(date)
}
