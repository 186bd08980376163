use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::EngineError;
use crate::join::JoinedLink;
use crate::models::{IngredientId, MealId, PerMealCost, PriceRecord, ShoppingListLine};

/// Round a currency amount to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[allow(clippy::cast_possible_truncation)]
fn to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

#[allow(clippy::cast_precision_loss)]
fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// The most recent week number in the price history.
pub fn reporting_period(records: &[PriceRecord]) -> Option<u32> {
    records.iter().map(|r| r.week_nr).max()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShoppingList {
    pub lines: Vec<ShoppingListLine>,
    /// Sum of every priced line's total, rounded to two decimals.
    pub total_price: f64,
    /// Number of distinct (meal, ingredient) lines.
    pub ingredient_count: usize,
    /// Lines left without a price because the ingredient was unresolved or
    /// unpriced. Their totals are not part of `total_price`.
    pub unpriced_lines: usize,
}

impl ShoppingList {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Fail on the first line without a unit price.
    pub fn require_priced(&self) -> Result<(), EngineError> {
        match self.lines.iter().find(|l| l.unit_price.is_none()) {
            Some(line) => Err(EngineError::UnresolvedIngredient {
                meal_id: line.meal_id,
                ingredient_id: line.ingredient_id,
            }),
            None => Ok(()),
        }
    }
}

struct LineAcc {
    meal_name: String,
    ingredient_name: Option<String>,
    quantity: f64,
    unit_price: Option<f64>,
    unpriced: bool,
}

/// Group joined link rows into shopping-list lines.
///
/// Rows are grouped by meal *and* ingredient ID, so the same ingredient used by
/// two meals stays on two lines. Quantities are summed; the unit price is the
/// ingredient's snapshot price and is never summed. If any contributing row
/// lacks a price, the whole line is unpriced. The line takes the first name
/// any of its rows carries.
pub fn build_shopping_list(rows: &[JoinedLink]) -> ShoppingList {
    let mut groups: BTreeMap<(MealId, IngredientId), LineAcc> = BTreeMap::new();

    for row in rows {
        let acc = groups
            .entry((row.meal_id, row.ingredient_id))
            .or_insert_with(|| LineAcc {
                meal_name: row.meal_name.clone(),
                ingredient_name: None,
                quantity: 0.0,
                unit_price: row.unit_price,
                unpriced: false,
            });
        acc.quantity += row.quantity;
        if acc.ingredient_name.is_none() {
            acc.ingredient_name.clone_from(&row.ingredient_name);
        }
        if row.unit_price.is_none() {
            acc.unpriced = true;
        }
    }

    let mut total_cents: i64 = 0;
    let mut unpriced_lines = 0;
    let lines: Vec<ShoppingListLine> = groups
        .into_iter()
        .map(|((meal_id, ingredient_id), acc)| {
            let unit_price = if acc.unpriced { None } else { acc.unit_price };
            let total_price = unit_price.map(|p| round2(acc.quantity * p));
            match total_price {
                Some(t) => total_cents += to_cents(t),
                None => unpriced_lines += 1,
            }
            ShoppingListLine {
                meal_id,
                meal_name: acc.meal_name,
                ingredient_id,
                ingredient_name: acc.ingredient_name,
                total_quantity: acc.quantity,
                unit_price,
                total_price,
            }
        })
        .collect();

    if unpriced_lines > 0 {
        tracing::warn!(lines = unpriced_lines, "shopping list has unpriced lines");
    }

    ShoppingList {
        ingredient_count: lines.len(),
        total_price: from_cents(total_cents),
        unpriced_lines,
        lines,
    }
}

/// One cost row per selected meal priced in `week`.
///
/// When a meal has several records in the week, the first one in source order
/// is used. Rows come out in order of first appearance.
#[must_use]
pub fn per_meal_costs(
    records: &[PriceRecord],
    meal_ids: &BTreeSet<MealId>,
    week: u32,
) -> Vec<PerMealCost> {
    let mut seen = BTreeSet::new();
    records
        .iter()
        .filter(|r| r.week_nr == week && meal_ids.contains(&r.meal_id))
        .filter(|r| seen.insert(r.meal_id))
        .map(|r| PerMealCost {
            meal_id: r.meal_id,
            meal_name: r.meal_name.clone(),
            total_meal_price: round2(r.current_price),
            price_per_portion: r.price_per_portion.map(round2),
        })
        .collect()
}
