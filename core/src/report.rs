use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;

use crate::aggregate::ShoppingList;
use crate::dates::{AnnotatedRecord, DISPLAY_FORMAT};
use crate::join::IngredientTrendPoint;
use crate::models::MealId;

/// Export headers, in column order.
pub const SHOPPING_LIST_COLUMNS: [&str; 6] = [
    "MealID",
    "Meal",
    "Ingredient",
    "Total Quantity",
    "Unit Price (€)",
    "Total Price (€)",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceTableRow {
    pub meal_id: MealId,
    pub meal: String,
    pub week_nr: u32,
    /// `DD-MM-YYYY`, or the raw value if the source date is malformed.
    pub date: String,
    pub current_price: f64,
    pub savings_abs: Option<f64>,
    pub price_per_portion: Option<f64>,
    pub year: Option<i32>,
    pub quarter: Option<String>,
    pub month: Option<String>,
    pub week: Option<String>,
}

/// Display rows for the filtered price history, sorted by week number, meal
/// name and meal ID.
pub fn price_table(rows: &[AnnotatedRecord]) -> Vec<PriceTableRow> {
    let mut table: Vec<PriceTableRow> = rows
        .iter()
        .map(|r| {
            let h = r.hierarchy.as_ref();
            PriceTableRow {
                meal_id: r.record.meal_id,
                meal: r.record.meal_name.clone(),
                week_nr: r.record.week_nr,
                date: r.display_date().to_string(),
                current_price: r.record.current_price,
                savings_abs: r.record.savings_abs,
                price_per_portion: r.record.price_per_portion,
                year: h.map(|h| h.year),
                quarter: h.map(|h| h.quarter.clone()),
                month: h.map(|h| h.month.clone()),
                week: h.map(|h| h.week.clone()),
            }
        })
        .collect();
    table.sort_by(|a, b| {
        (a.week_nr, &a.meal, a.meal_id).cmp(&(b.week_nr, &b.meal, b.meal_id))
    });
    table
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MealMetric {
    CurrentPrice,
    SavingsAbs,
}

impl MealMetric {
    fn value(self, row: &AnnotatedRecord) -> Option<f64> {
        match self {
            Self::CurrentPrice => Some(row.record.current_price),
            Self::SavingsAbs => row.record.savings_abs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: String,
    pub value: f64,
}

/// One plotted line: a category against display dates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub category: String,
    pub points: Vec<SeriesPoint>,
}

fn build_series<'a>(entries: impl Iterator<Item = (&'a str, NaiveDate, f64)>) -> Vec<Series> {
    let mut by_category: BTreeMap<&str, Vec<(NaiveDate, f64)>> = BTreeMap::new();
    for (category, date, value) in entries {
        by_category.entry(category).or_default().push((date, value));
    }
    by_category
        .into_iter()
        .map(|(category, mut points)| {
            // Stable: same-day points keep source order
            points.sort_by_key(|(d, _)| *d);
            Series {
                category: category.to_string(),
                points: points
                    .into_iter()
                    .map(|(d, value)| SeriesPoint {
                        date: d.format(DISPLAY_FORMAT).to_string(),
                        value,
                    })
                    .collect(),
            }
        })
        .collect()
}

/// One series per meal name. Undated rows and missing values are not plotted.
pub fn meal_series(rows: &[AnnotatedRecord], metric: MealMetric) -> Vec<Series> {
    build_series(rows.iter().filter_map(|r| {
        let date = r.date?;
        let value = metric.value(r)?;
        Some((r.record.meal_name.as_str(), date, value))
    }))
}

/// One series per ingredient, plotting its latest price.
pub fn ingredient_series(points: &[IngredientTrendPoint]) -> Vec<Series> {
    build_series(
        points
            .iter()
            .filter_map(|p| Some((p.ingredient.as_str(), p.date, p.latest_price?))),
    )
}

fn money(v: Option<f64>) -> String {
    v.map(|v| format!("{v:.2}")).unwrap_or_default()
}

/// Serialize the shopping list as CSV with the export headers.
pub fn shopping_list_csv(list: &ShoppingList) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(SHOPPING_LIST_COLUMNS)
        .context("Failed to write CSV header")?;
    for line in &list.lines {
        wtr.write_record([
            line.meal_id.to_string(),
            line.meal_name.clone(),
            line.ingredient_name.clone().unwrap_or_default(),
            line.total_quantity.to_string(),
            money(line.unit_price),
            money(line.total_price),
        ])
        .context("Failed to write CSV row")?;
    }
    let bytes = wtr.into_inner().context("Failed to flush CSV")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}
