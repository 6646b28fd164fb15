//! 三大法人持股比例的回溯變化(5/20/60/120 個交易日)。
//!
//! 回溯以序列中的筆數計算，不是日曆天。

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::{
    calculation::record::{InstitutionalRatio, WindowChanges},
    declare::ChangeWindow,
    error::CalculationError,
};

/// 計算 `rows[index]` 相對於往前 `window` 筆的比例變化。
///
/// `rows` 必須依日期遞增，`index` 必須在範圍內。
/// 不足 W+1 筆時回傳 `InsufficientHistory`，任一端比例未定義時回傳 `UndefinedRatio`。
pub fn window_change(
    rows: &[InstitutionalRatio],
    index: usize,
    window: ChangeWindow,
) -> Result<Decimal, CalculationError> {
    let current = &rows[index];
    let offset = window.days();

    if index < offset {
        return Err(CalculationError::InsufficientHistory {
            code: current.security_code.clone(),
            date: current.trade_date,
            window,
            available: index + 1,
            required: offset + 1,
        });
    }

    let previous = &rows[index - offset];
    match (current.three_inst_ratio_est, previous.three_inst_ratio_est) {
        (Some(now), Some(before)) => Ok(now - before),
        _ => Err(CalculationError::UndefinedRatio {
            code: current.security_code.clone(),
            date: current.trade_date,
            window,
        }),
    }
}

/// 計算 `rows[index]` 所有視窗的變化，無法計算的視窗為 `None`
pub fn window_changes(rows: &[InstitutionalRatio], index: usize) -> WindowChanges {
    let mut changes = WindowChanges::default();
    for window in ChangeWindow::iterator() {
        changes.set(window, window_change(rows, index, window).ok());
    }

    changes
}

/// 指定日期的各視窗變化，序列中沒有該日期時回傳 `None`
pub fn changes_on(rows: &[InstitutionalRatio], date: NaiveDate) -> Option<WindowChanges> {
    let index = rows
        .binary_search_by_key(&date, |row| row.trade_date)
        .ok()?;

    Some(window_changes(rows, index))
}

/// 將整段序列的 change_5d ~ change_120d 填好
pub fn fill_changes(rows: &mut [InstitutionalRatio]) {
    let changes: Vec<WindowChanges> = (0..rows.len())
        .map(|index| window_changes(rows, index))
        .collect();

    for (row, change) in rows.iter_mut().zip(changes) {
        row.changes = change;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Days;
    use rust_decimal_macros::dec;

    use super::*;

    fn series(values: &[Option<Decimal>]) -> Vec<InstitutionalRatio> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let mut row =
                    InstitutionalRatio::new("2330".to_string(), start + Days::new(i as u64));
                row.three_inst_ratio_est = *value;
                row
            })
            .collect()
    }

    #[test]
    fn test_three_rows_leave_five_day_undefined() {
        let mut rows = series(&[Some(dec!(1)), Some(dec!(2)), Some(dec!(3))]);
        fill_changes(&mut rows);
        assert!(rows.iter().all(|row| row.changes == WindowChanges::default()));

        let why = window_change(&rows, 2, ChangeWindow::D5).unwrap_err();
        assert!(matches!(
            why,
            CalculationError::InsufficientHistory {
                available: 3,
                required: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_defined_exactly_at_w_plus_one_row() {
        let values: Vec<Option<Decimal>> = (0..7).map(|i| Some(Decimal::from(i * 2))).collect();
        let mut rows = series(&values);
        fill_changes(&mut rows);

        assert_eq!(rows[4].changes.change_5d, None);
        assert_eq!(rows[5].changes.change_5d, Some(dec!(10)));
        assert_eq!(rows[6].changes.change_5d, Some(dec!(10)));
        assert_eq!(rows[6].changes.change_20d, None);
    }

    #[test]
    fn test_undefined_endpoint() {
        let mut values = vec![Some(dec!(0.5)); 6];
        values[0] = None;
        let rows = series(&values);

        assert!(matches!(
            window_change(&rows, 5, ChangeWindow::D5),
            Err(CalculationError::UndefinedRatio { .. })
        ));
    }

    #[test]
    fn test_negative_change() {
        let mut values = vec![Some(dec!(12.5)); 21];
        values[20] = Some(dec!(10.25));
        let rows = series(&values);

        assert_eq!(
            window_change(&rows, 20, ChangeWindow::D20).unwrap(),
            dec!(-2.25)
        );
        let changes = window_changes(&rows, 20);
        assert_eq!(changes.change_5d, Some(dec!(-2.25)));
        assert_eq!(changes.change_60d, None);
    }

    #[test]
    fn test_changes_on_date() {
        let rows = series(&[Some(dec!(1)); 6]);
        let last = rows[5].trade_date;

        assert_eq!(changes_on(&rows, last).unwrap().change_5d, Some(dec!(0)));
        assert!(changes_on(&rows, last + Days::new(1)).is_none());
    }
}
