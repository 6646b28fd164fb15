use std::{fmt, str::FromStr};

use anyhow::{anyhow, Error};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};

/// 掛牌市場
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum Market {
    /// 上市(證交所)
    #[serde(rename = "TWSE")]
    Twse,
    /// 上櫃(櫃買中心)
    #[serde(rename = "TPEX")]
    Tpex,
}

impl Market {
    /// 資料庫與 API 使用的代碼
    pub fn code(&self) -> &'static str {
        match self {
            Market::Twse => "TWSE",
            Market::Tpex => "TPEX",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Market::Twse => "上市",
            Market::Tpex => "上櫃",
        }
    }

    pub fn iterator() -> impl Iterator<Item = Market> {
        Market::iter()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Market {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TWSE" | "TSE" | "上市" => Ok(Market::Twse),
            "TPEX" | "OTC" | "上櫃" => Ok(Market::Tpex),
            other => Err(anyhow!("unknown market: {}", other)),
        }
    }
}

/// 比例變化的回溯視窗(以交易日筆數計)
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter)]
pub enum ChangeWindow {
    D5,
    D20,
    D60,
    D120,
}

impl ChangeWindow {
    pub fn days(&self) -> usize {
        match self {
            ChangeWindow::D5 => 5,
            ChangeWindow::D20 => 20,
            ChangeWindow::D60 => 60,
            ChangeWindow::D120 => 120,
        }
    }

    pub fn iterator() -> impl Iterator<Item = ChangeWindow> {
        ChangeWindow::iter()
    }
}

impl TryFrom<i64> for ChangeWindow {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(ChangeWindow::D5),
            20 => Ok(ChangeWindow::D20),
            60 => Ok(ChangeWindow::D60),
            120 => Ok(ChangeWindow::D120),
            _ => Err(anyhow!("window must be one of 5, 20, 60, 120 but got {}", value)),
        }
    }
}

impl FromStr for ChangeWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let days = s
            .trim()
            .trim_end_matches(['d', 'D'])
            .parse::<i64>()
            .map_err(|why| anyhow!("invalid window {}: {:?}", s, why))?;

        ChangeWindow::try_from(days)
    }
}

impl fmt::Display for ChangeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.days())
    }
}

/// 排行方向
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum RankDirection {
    /// 增幅最大(遞減排序)
    #[default]
    #[serde(rename = "up")]
    Gainers,
    /// 減幅最大(遞增排序)
    #[serde(rename = "down")]
    Losers,
}

impl RankDirection {
    pub fn code(&self) -> &'static str {
        match self {
            RankDirection::Gainers => "up",
            RankDirection::Losers => "down",
        }
    }
}

impl FromStr for RankDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "gainers" => Ok(RankDirection::Gainers),
            "down" | "losers" => Ok(RankDirection::Losers),
            other => Err(anyhow!("direction must be up or down but got {}", other)),
        }
    }
}

/// 券商分點進出的方向
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BrokerSide {
    /// 買超
    #[serde(rename = "buy")]
    Buy,
    /// 賣超
    #[serde(rename = "sell")]
    Sell,
}

impl BrokerSide {
    pub fn code(&self) -> &'static str {
        match self {
            BrokerSide::Buy => "buy",
            BrokerSide::Sell => "sell",
        }
    }
}

impl FromStr for BrokerSide {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(BrokerSide::Buy),
            "sell" => Ok(BrokerSide::Sell),
            other => Err(anyhow!("side must be buy or sell but got {}", other)),
        }
    }
}
