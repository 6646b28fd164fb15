use rust_decimal::Decimal;

use crate::{
    calculation::record::{InstitutionalRatio, Security},
    declare::{ChangeWindow, Market, RankDirection},
};

/// 排行查詢條件
#[derive(Debug, Clone, Copy)]
pub struct RankingQuery {
    pub window: ChangeWindow,
    /// `None` 表示不限市場
    pub market: Option<Market>,
    pub limit: usize,
    pub direction: RankDirection,
}

/// 排行結果
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSecurity {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub three_inst_ratio: Option<Decimal>,
    pub change: Decimal,
}

/// 依指定視窗的變化排序。
///
/// 變化未定義的股票不列入，同值時依股票代號遞增排序。
pub fn rank(
    candidates: &[(Security, InstitutionalRatio)],
    query: &RankingQuery,
) -> Vec<RankedSecurity> {
    let mut ranked: Vec<RankedSecurity> = candidates
        .iter()
        .filter(|(security, _)| query.market.map_or(true, |market| market == security.market))
        .filter_map(|(security, ratio)| {
            ratio
                .changes
                .get(query.window)
                .map(|change| RankedSecurity {
                    code: security.code.clone(),
                    name: security.name.clone(),
                    market: security.market,
                    three_inst_ratio: ratio.three_inst_ratio_est,
                    change,
                })
        })
        .collect();

    ranked.sort_by(|a, b| {
        let by_change = match query.direction {
            RankDirection::Gainers => b.change.cmp(&a.change),
            RankDirection::Losers => a.change.cmp(&b.change),
        };
        by_change.then_with(|| a.code.cmp(&b.code))
    });
    ranked.truncate(query.limit);

    ranked
}
