use std::collections::BTreeSet;

use serde::Serialize;

use crate::dates::{AnnotatedRecord, DateHierarchy};

/// One filter dimension: everything, or exactly the listed values.
///
/// An explicit empty set matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T: Ord> {
    All,
    Only(BTreeSet<T>),
}

impl<T: Ord> Default for Selection<T> {
    fn default() -> Self {
        Self::All
    }
}

impl<T: Ord> Selection<T> {
    pub fn only<I: IntoIterator<Item = T>>(values: I) -> Self {
        Self::Only(values.into_iter().collect())
    }

    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    pub fn contains(&self, value: &T) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSpec {
    pub meals: Selection<String>,
    pub week_numbers: Selection<u32>,
    pub years: Selection<i32>,
    pub quarters: Selection<String>,
    pub months: Selection<String>,
    pub weeks: Selection<String>,
    pub days: Selection<String>,
}

impl FilterSpec {
    /// True when none of the five date-hierarchy dimensions is restricted.
    pub fn dates_unrestricted(&self) -> bool {
        self.years.is_all()
            && self.quarters.is_all()
            && self.months.is_all()
            && self.weeks.is_all()
            && self.days.is_all()
    }

    pub fn matches(&self, row: &AnnotatedRecord) -> bool {
        if !self.meals.contains(&row.record.meal_name)
            || !self.week_numbers.contains(&row.record.week_nr)
        {
            return false;
        }
        match &row.hierarchy {
            Some(h) => self.matches_hierarchy(h),
            // Undated rows only survive when no date dimension is in play
            None => self.dates_unrestricted(),
        }
    }

    fn matches_hierarchy(&self, h: &DateHierarchy) -> bool {
        self.years.contains(&h.year)
            && self.quarters.contains(&h.quarter)
            && self.months.contains(&h.month)
            && self.weeks.contains(&h.week)
            && self.days.contains(&h.day)
    }
}

/// The records accepted by `spec`, in source order.
#[must_use]
pub fn apply(rows: &[AnnotatedRecord], spec: &FilterSpec) -> Vec<AnnotatedRecord> {
    let filtered: Vec<AnnotatedRecord> = rows.iter().filter(|r| spec.matches(r)).cloned().collect();
    tracing::debug!(input = rows.len(), output = filtered.len(), "applied filter");
    filtered
}

/// Selectable values per dimension, each list sorted and de-duplicated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterOptions {
    pub meals: Vec<String>,
    pub week_numbers: Vec<u32>,
    pub years: Vec<i32>,
    pub quarters: Vec<String>,
    pub months: Vec<String>,
    pub weeks: Vec<String>,
    pub days: Vec<String>,
}

/// Derive the cascading menu options for the current selections.
///
/// Meal and week-number options always list everything present. Each date
/// level only offers values occurring under the coarser levels already
/// selected: quarters within the selected years, months within the selected
/// years and quarters, and so on down to days.
pub fn options(rows: &[AnnotatedRecord], spec: &FilterSpec) -> FilterOptions {
    let meals: BTreeSet<&str> = rows.iter().map(|r| r.record.meal_name.as_str()).collect();
    let week_numbers: BTreeSet<u32> = rows.iter().map(|r| r.record.week_nr).collect();

    let dated: Vec<&DateHierarchy> = rows.iter().filter_map(|r| r.hierarchy.as_ref()).collect();

    let years: BTreeSet<i32> = dated.iter().map(|h| h.year).collect();
    let in_years: Vec<&DateHierarchy> = dated
        .into_iter()
        .filter(|h| spec.years.contains(&h.year))
        .collect();
    let quarters = labels(&in_years, |h| &h.quarter);
    let in_quarters: Vec<&DateHierarchy> = in_years
        .into_iter()
        .filter(|h| spec.quarters.contains(&h.quarter))
        .collect();
    let months = labels(&in_quarters, |h| &h.month);
    let in_months: Vec<&DateHierarchy> = in_quarters
        .into_iter()
        .filter(|h| spec.months.contains(&h.month))
        .collect();
    let weeks = labels(&in_months, |h| &h.week);
    let in_weeks: Vec<&DateHierarchy> = in_months
        .into_iter()
        .filter(|h| spec.weeks.contains(&h.week))
        .collect();
    let days = labels(&in_weeks, |h| &h.day);

    FilterOptions {
        meals: meals.into_iter().map(String::from).collect(),
        week_numbers: week_numbers.into_iter().collect(),
        years: years.into_iter().collect(),
        quarters,
        months,
        weeks,
        days,
    }
}

fn labels(rows: &[&DateHierarchy], key: impl Fn(&DateHierarchy) -> &String) -> Vec<String> {
    let set: BTreeSet<&String> = rows.iter().map(|h| key(*h)).collect();
    set.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::normalize;
    use crate::models::PriceRecord;

    fn rec(meal_id: i64, name: &str, week_nr: u32, date: &str) -> PriceRecord {
        PriceRecord {
            meal_id,
            meal_name: name.to_string(),
            week_nr,
            date: date.to_string(),
            current_price: 10.0,
            savings_abs: Some(1.0),
            price_per_portion: Some(2.5),
        }
    }

    fn sample() -> Vec<AnnotatedRecord> {
        normalize(&[
            rec(1, "Pasta", 52, "30-12-2023"),
            rec(2, "Curry", 1, "03-01-2024"),
            rec(1, "Pasta", 14, "02-04-2024"),
            rec(3, "Soup", 15, "10-04-2024"),
            rec(2, "Curry", 27, "05-07-2024"),
            rec(3, "Soup", 27, "not a date"),
        ])
        .rows
    }

    fn names(rows: &[AnnotatedRecord]) -> Vec<(&str, &str)> {
        rows.iter()
            .map(|r| (r.record.meal_name.as_str(), r.record.date.as_str()))
            .collect()
    }

    #[test]
    fn test_default_spec_matches_everything() {
        let rows = sample();
        let out = apply(&rows, &FilterSpec::default());
        assert_eq!(out.len(), rows.len());
    }

    #[test]
    fn test_meal_and_week_number_filters() {
        let rows = sample();
        let spec = FilterSpec {
            meals: Selection::only(["Soup".to_string()]),
            week_numbers: Selection::only([27]),
            ..FilterSpec::default()
        };
        let out = apply(&rows, &spec);
        // The undated Soup row still passes a week-number-only filter
        assert_eq!(names(&out), vec![("Soup", "not a date")]);
    }

    #[test]
    fn test_undated_rows_excluded_from_date_filters() {
        let rows = sample();
        let spec = FilterSpec {
            years: Selection::only([2024]),
            ..FilterSpec::default()
        };
        let out = apply(&rows, &spec);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|r| r.hierarchy.is_some()));
    }

    #[test]
    fn test_empty_selection_on_any_dimension_yields_nothing() {
        let rows = sample();
        let specs = [
            FilterSpec {
                meals: Selection::none(),
                ..FilterSpec::default()
            },
            FilterSpec {
                week_numbers: Selection::none(),
                ..FilterSpec::default()
            },
            FilterSpec {
                years: Selection::none(),
                ..FilterSpec::default()
            },
            FilterSpec {
                quarters: Selection::none(),
                ..FilterSpec::default()
            },
            FilterSpec {
                months: Selection::none(),
                ..FilterSpec::default()
            },
            FilterSpec {
                weeks: Selection::none(),
                ..FilterSpec::default()
            },
            FilterSpec {
                days: Selection::none(),
                ..FilterSpec::default()
            },
        ];
        for spec in &specs {
            assert!(apply(&rows, spec).is_empty(), "{spec:?}");
        }
    }

    #[test]
    fn test_filter_is_idempotent() {
        let rows = sample();
        let spec = FilterSpec {
            quarters: Selection::only(["2024Q2".to_string()]),
            ..FilterSpec::default()
        };
        let once = apply(&rows, &spec);
        let twice = apply(&once, &spec);
        assert_eq!(once, twice);
        assert_eq!(
            names(&once),
            vec![("Pasta", "02-04-2024"), ("Soup", "10-04-2024")]
        );
    }

    #[test]
    fn test_narrower_spec_yields_subset() {
        let rows = sample();
        let wide = FilterSpec {
            years: Selection::only([2024]),
            ..FilterSpec::default()
        };
        let narrow = FilterSpec {
            years: Selection::only([2024]),
            months: Selection::only(["2024-04".to_string()]),
            meals: Selection::only(["Pasta".to_string(), "Soup".to_string()]),
            ..FilterSpec::default()
        };
        let wide_out = apply(&rows, &wide);
        let narrow_out = apply(&rows, &narrow);
        assert!(narrow_out.len() < wide_out.len());
        assert!(narrow_out.iter().all(|r| wide_out.contains(r)));
    }

    #[test]
    fn test_order_of_predicates_does_not_matter() {
        let rows = sample();
        let a = FilterSpec {
            meals: Selection::only(["Curry".to_string()]),
            ..FilterSpec::default()
        };
        let b = FilterSpec {
            quarters: Selection::only(["2024Q1".to_string(), "2024Q3".to_string()]),
            ..FilterSpec::default()
        };
        let both = FilterSpec {
            meals: a.meals.clone(),
            quarters: b.quarters.clone(),
            ..FilterSpec::default()
        };
        let ab = apply(&apply(&rows, &a), &b);
        let ba = apply(&apply(&rows, &b), &a);
        assert_eq!(ab, ba);
        assert_eq!(ab, apply(&rows, &both));
    }

    #[test]
    fn test_options_unrestricted() {
        let rows = sample();
        let opts = options(&rows, &FilterSpec::default());
        assert_eq!(opts.meals, vec!["Curry", "Pasta", "Soup"]);
        assert_eq!(opts.week_numbers, vec![1, 14, 15, 27, 52]);
        assert_eq!(opts.years, vec![2023, 2024]);
        assert_eq!(opts.quarters, vec!["2023Q4", "2024Q1", "2024Q2", "2024Q3"]);
        assert_eq!(opts.days.len(), 5);
    }

    #[test]
    fn test_options_cascade_from_coarser_selections() {
        let rows = sample();
        let spec = FilterSpec {
            years: Selection::only([2024]),
            quarters: Selection::only(["2024Q2".to_string()]),
            ..FilterSpec::default()
        };
        let opts = options(&rows, &spec);
        // Years are never constrained
        assert_eq!(opts.years, vec![2023, 2024]);
        assert_eq!(opts.quarters, vec!["2024Q1", "2024Q2", "2024Q3"]);
        assert_eq!(opts.months, vec!["2024-04"]);
        assert_eq!(opts.days, vec!["2024-04-02", "2024-04-10"]);
    }

    #[test]
    fn test_options_empty_selection_empties_finer_levels() {
        let rows = sample();
        let spec = FilterSpec {
            years: Selection::none(),
            ..FilterSpec::default()
        };
        let opts = options(&rows, &spec);
        assert_eq!(opts.years, vec![2023, 2024]);
        assert!(opts.quarters.is_empty());
        assert!(opts.months.is_empty());
        assert!(opts.weeks.is_empty());
        assert!(opts.days.is_empty());
    }

    #[test]
    fn test_options_on_empty_input() {
        let opts = options(&[], &FilterSpec::default());
        assert_eq!(opts, FilterOptions::default());
    }
}
