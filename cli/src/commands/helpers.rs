use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use larder_core::filter::{FilterSpec, Selection};
use larder_core::models::DataQuality;

/// Filter flags shared by `dashboard` and `filters`.
///
/// A flag left out means "all values". A flag given with no values selects
/// nothing, e.g. `--year` on its own.
#[derive(Args, Debug, Default)]
pub(crate) struct FilterArgs {
    /// Meal names (comma-separated)
    #[arg(long = "meal", num_args = 0.., value_delimiter = ',', value_name = "NAME")]
    pub meals: Option<Vec<String>>,
    /// Source week numbers (WeekNr)
    #[arg(long = "week-nr", num_args = 0.., value_delimiter = ',', value_name = "N")]
    pub week_numbers: Option<Vec<u32>>,
    /// Years, e.g. 2024
    #[arg(long = "year", num_args = 0.., value_delimiter = ',', value_name = "YYYY")]
    pub years: Option<Vec<i32>>,
    /// Quarters, e.g. 2024Q1
    #[arg(long = "quarter", num_args = 0.., value_delimiter = ',', value_name = "YYYYQn")]
    pub quarters: Option<Vec<String>>,
    /// Months, e.g. 2024-03
    #[arg(long = "month", num_args = 0.., value_delimiter = ',', value_name = "YYYY-MM")]
    pub months: Option<Vec<String>>,
    /// Calendar weeks, e.g. 2024-W09
    #[arg(long = "week", num_args = 0.., value_delimiter = ',', value_name = "YYYY-Wnn")]
    pub weeks: Option<Vec<String>>,
    /// Days, e.g. 2024-03-01
    #[arg(long = "day", num_args = 0.., value_delimiter = ',', value_name = "YYYY-MM-DD")]
    pub days: Option<Vec<String>>,
}

impl FilterArgs {
    pub(crate) fn into_spec(self) -> FilterSpec {
        FilterSpec {
            meals: selection(self.meals),
            week_numbers: selection(self.week_numbers),
            years: selection(self.years),
            quarters: selection(self.quarters),
            months: selection(self.months),
            weeks: selection(self.weeks),
            days: selection(self.days),
        }
    }
}

pub(crate) fn selection<T: Ord>(values: Option<Vec<T>>) -> Selection<T> {
    values.map_or(Selection::All, Selection::only)
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

/// Amount with two decimals, or `-` when missing.
pub(crate) fn money(v: Option<f64>) -> String {
    v.map_or("-".into(), |v| format!("{v:.2}"))
}

pub(crate) fn quantity(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v}")
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

/// Print data-quality findings to stderr so stdout stays clean.
pub(crate) fn report_quality(quality: &DataQuality) {
    if !quality.malformed_dates.is_empty() {
        let n = quality.malformed_dates.len();
        let sample = quality
            .malformed_dates
            .iter()
            .take(3)
            .map(|d| format!("'{d}'"))
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!("Warning: {n} unparseable date(s), e.g. {sample}");
    }
    for r in &quality.unresolved_ingredients {
        let (meal, ingredient) = (r.meal_id, r.ingredient_id);
        eprintln!("Warning: ingredient {ingredient} of meal {meal} is not in the catalog");
    }
    if quality.unmatched_history_rows > 0 {
        let n = quality.unmatched_history_rows;
        eprintln!("Warning: {n} ingredient history row(s) match no single catalog ingredient");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::models::UnresolvedRef;

    #[test]
    fn test_selection_absent_is_all() {
        assert!(selection::<i32>(None).is_all());
    }

    #[test]
    fn test_selection_empty_is_none() {
        let s = selection::<i32>(Some(vec![]));
        assert!(!s.is_all());
        assert!(!s.contains(&2024));
    }

    #[test]
    fn test_into_spec() {
        let args = FilterArgs {
            years: Some(vec![2024]),
            quarters: Some(vec!["2024Q1".to_string()]),
            ..FilterArgs::default()
        };
        let spec = args.into_spec();
        assert!(spec.meals.is_all());
        assert!(spec.years.contains(&2024));
        assert!(!spec.years.contains(&2023));
        assert!(spec.quarters.contains(&"2024Q1".to_string()));
        assert!(spec.days.is_all());
    }

    #[test]
    fn test_money() {
        assert_eq!(money(Some(3.0)), "3.00");
        assert_eq!(money(Some(5.626)), "5.63");
        assert_eq!(money(None), "-");
    }

    #[test]
    fn test_quantity() {
        assert_eq!(quantity(2.0), "2");
        assert_eq!(quantity(0.5), "0.5");
    }

    #[test]
    fn test_truncate_utf8() {
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
        assert_eq!(truncate("Müsli", 10), "Müsli");
    }

    #[test]
    fn test_report_quality_does_not_panic() {
        report_quality(&DataQuality {
            malformed_dates: vec!["soon".to_string()],
            unresolved_ingredients: vec![UnresolvedRef {
                meal_id: 1,
                ingredient_id: 9,
            }],
            unmatched_history_rows: 2,
        });
    }
}
