use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::aggregate::{self, ShoppingList};
use crate::dates;
use crate::error::EngineError;
use crate::filter::{self, FilterOptions, FilterSpec, Selection};
use crate::join::{self, Catalog, IngredientTrendPoint};
use crate::loader::DataLoader;
use crate::models::{DataQuality, MealId, PerMealCost, Tables};
use crate::report::{self, MealMetric, PriceTableRow, Series};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardReport {
    /// Number of price records after filtering.
    pub record_count: usize,
    pub price_table: Vec<PriceTableRow>,
    pub meal_price_series: Vec<Series>,
    pub savings_series: Vec<Series>,
    pub ingredient_trend: Vec<IngredientTrendPoint>,
    pub ingredient_series: Vec<Series>,
    pub options: FilterOptions,
    pub quality: DataQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingListReport {
    /// Reporting period used for the per-meal costs.
    pub week: Option<u32>,
    pub selected_meals: Vec<String>,
    /// Selected names with no entry in the meal catalog.
    pub unknown_meals: Vec<String>,
    pub shopping_list: ShoppingList,
    pub per_meal: Vec<PerMealCost>,
    pub quality: DataQuality,
}

/// Run the dashboard pipeline: normalize, filter, then attach the price trend
/// of every ingredient used by the selected meals, limited to the date range
/// of the filtered rows.
pub fn dashboard_report(
    tables: &Tables,
    spec: &FilterSpec,
) -> Result<DashboardReport, EngineError> {
    let catalog = Catalog::build(&tables.meals, &tables.ingredients)?;
    let normalized = dates::normalize(&tables.price_history);
    let filtered = filter::apply(&normalized.rows, spec);

    let meal_ids: BTreeSet<MealId> = catalog
        .meals_named(&spec.meals)
        .iter()
        .map(|m| m.meal_id)
        .collect();
    let relevant = join::relevant_ingredients(&tables.links, &meal_ids);
    let trend = join::ingredient_trend(
        &tables.ingredient_history,
        &catalog,
        &relevant,
        join::date_range(&filtered),
    );

    let mut malformed_dates = normalized.malformed_values();
    malformed_dates.extend(trend.malformed.iter().filter_map(|e| match e {
        EngineError::MalformedDate { value } => Some(value.clone()),
        _ => None,
    }));

    tracing::debug!(
        records = filtered.len(),
        ingredients = relevant.len(),
        trend_points = trend.points.len(),
        "built dashboard"
    );

    Ok(DashboardReport {
        record_count: filtered.len(),
        price_table: report::price_table(&filtered),
        meal_price_series: report::meal_series(&filtered, MealMetric::CurrentPrice),
        savings_series: report::meal_series(&filtered, MealMetric::SavingsAbs),
        ingredient_series: report::ingredient_series(&trend.points),
        ingredient_trend: trend.points,
        options: filter::options(&normalized.rows, spec),
        quality: DataQuality {
            malformed_dates,
            unresolved_ingredients: Vec::new(),
            unmatched_history_rows: trend.unmatched,
        },
    })
}

/// Cascading filter options for `spec` over the whole price history.
pub fn filter_options(tables: &Tables, spec: &FilterSpec) -> FilterOptions {
    filter::options(&dates::normalize(&tables.price_history).rows, spec)
}

/// Build the shopping list and per-meal costs for the meals named in `selected`.
///
/// The shopping list covers every link of the selected meals; per-meal costs
/// are taken from the reporting period only.
pub fn shopping_list_report(
    tables: &Tables,
    selected: &BTreeSet<String>,
) -> Result<ShoppingListReport, EngineError> {
    let catalog = Catalog::build(&tables.meals, &tables.ingredients)?;
    let meals = catalog.meals_named(&Selection::only(selected.iter().cloned()));
    let meal_ids: BTreeSet<MealId> = meals.iter().map(|m| m.meal_id).collect();

    let known: BTreeSet<&str> = meals.iter().map(|m| m.meal_name.as_str()).collect();
    let unknown_meals: Vec<String> = selected
        .iter()
        .filter(|name| !known.contains(name.as_str()))
        .cloned()
        .collect();
    if !unknown_meals.is_empty() {
        tracing::warn!(meals = ?unknown_meals, "selected meals not in catalog");
    }

    let joined = join::join_shopping_rows(&catalog, &tables.links, &meals);
    let shopping_list = aggregate::build_shopping_list(&joined.rows);

    let week = aggregate::reporting_period(&tables.price_history);
    let per_meal = week
        .map(|w| aggregate::per_meal_costs(&tables.price_history, &meal_ids, w))
        .unwrap_or_default();

    tracing::debug!(
        meals = meal_ids.len(),
        lines = shopping_list.lines.len(),
        week = ?week,
        "built shopping list"
    );

    Ok(ShoppingListReport {
        week,
        selected_meals: selected.iter().cloned().collect(),
        unknown_meals,
        shopping_list,
        per_meal,
        quality: DataQuality {
            unresolved_ingredients: joined.unresolved,
            ..DataQuality::default()
        },
    })
}

/// Distinct meal names from the catalog, for selection menus.
pub fn available_meals(tables: &Tables) -> Result<Vec<String>, EngineError> {
    Ok(Catalog::build(&tables.meals, &tables.ingredients)?.meal_names())
}

/// Entry point for front ends: loads the source tables for one data
/// directory through a cached [`DataLoader`] and runs the report pipelines.
#[derive(Debug)]
pub struct LarderService {
    loader: DataLoader,
    data_dir: PathBuf,
}

impl LarderService {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            loader: DataLoader::new(),
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn tables(&mut self) -> Result<Arc<Tables>> {
        self.loader.load(&self.data_dir)
    }

    pub fn dashboard(&mut self, spec: &FilterSpec) -> Result<DashboardReport> {
        let tables = self.tables()?;
        Ok(dashboard_report(&tables, spec)?)
    }

    pub fn filter_options(&mut self, spec: &FilterSpec) -> Result<FilterOptions> {
        let tables = self.tables()?;
        Ok(filter_options(&tables, spec))
    }

    pub fn shopping_list(&mut self, meals: &BTreeSet<String>) -> Result<ShoppingListReport> {
        let tables = self.tables()?;
        Ok(shopping_list_report(&tables, meals)?)
    }

    pub fn shopping_list_csv(&mut self, meals: &BTreeSet<String>) -> Result<String> {
        let report = self.shopping_list(meals)?;
        report::shopping_list_csv(&report.shopping_list)
    }

    pub fn available_meals(&mut self) -> Result<Vec<String>> {
        let tables = self.tables()?;
        Ok(available_meals(&tables)?)
    }

    /// Drop cached tables so the next call re-reads the source files.
    pub fn reload(&mut self) -> bool {
        let dropped = self.loader.invalidate(&self.data_dir);
        tracing::debug!(dir = %self.data_dir.display(), dropped, "reloading source tables");
        dropped
    }
}
