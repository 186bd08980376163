use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{PerMealCost, ShoppingListLine};
use larder_core::report::shopping_list_csv;
use larder_core::service::LarderService;

use super::helpers::{money, print_json, quantity, report_quality, truncate};

pub(crate) fn cmd_shopping_list(
    service: &mut LarderService,
    meals: Vec<String>,
    all: bool,
    csv: Option<&Path>,
    json: bool,
) -> Result<()> {
    let selected: BTreeSet<String> = if all {
        service.available_meals()?.into_iter().collect()
    } else {
        meals.into_iter().collect()
    };

    if selected.is_empty() {
        eprintln!("No meals selected. Name one or more meals, or pass --all");
        process::exit(2);
    }

    let report = service.shopping_list(&selected)?;

    if let Some(path) = csv {
        let out = shopping_list_csv(&report.shopping_list)?;
        std::fs::write(path, out)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        let n = report.shopping_list.lines.len();
        eprintln!("Wrote {n} line(s) to {}", path.display());
    }

    if json {
        return print_json(&report);
    }

    report_quality(&report.quality);
    for name in &report.unknown_meals {
        eprintln!("Warning: no meal named '{name}'");
    }

    let list = &report.shopping_list;
    if list.is_empty() {
        eprintln!("No ingredients found for the selected meals");
        process::exit(2);
    }

    println!("=== Shopping list ===\n");
    print_shopping_table(&list.lines);
    let total = list.total_price;
    let count = list.ingredient_count;
    println!("\n  TOTAL: €{total:.2} | {count} ingredient(s)");
    if list.unpriced_lines > 0 {
        let n = list.unpriced_lines;
        println!("  ({n} line(s) without a price are not included in the total)");
    }

    match report.week {
        Some(week) if !report.per_meal.is_empty() => {
            println!("\n=== Meal prices, week {week} ===\n");
            print_per_meal_table(&report.per_meal);
        }
        Some(week) => eprintln!("No prices recorded in week {week} for the selected meals"),
        None => eprintln!("No price history to take meal prices from"),
    }

    Ok(())
}

pub(crate) fn cmd_meals(service: &mut LarderService, json: bool) -> Result<()> {
    let meals = service.available_meals()?;

    if json {
        return print_json(&meals);
    }

    if meals.is_empty() {
        eprintln!("No meals in the catalog");
        process::exit(2);
    }

    for meal in &meals {
        println!("{meal}");
    }
    Ok(())
}

fn print_shopping_table(lines: &[ShoppingListLine]) {
    #[derive(Tabled)]
    struct LineRow {
        #[tabled(rename = "MealID")]
        meal_id: i64,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Ingredient")]
        ingredient: String,
        #[tabled(rename = "Total Quantity")]
        quantity: String,
        #[tabled(rename = "Unit Price (€)")]
        unit_price: String,
        #[tabled(rename = "Total Price (€)")]
        total_price: String,
    }

    let rows: Vec<LineRow> = lines
        .iter()
        .map(|l| LineRow {
            meal_id: l.meal_id,
            meal: truncate(&l.meal_name, 30),
            ingredient: l
                .ingredient_name
                .as_deref()
                .map_or_else(|| format!("#{}", l.ingredient_id), |n| truncate(n, 35)),
            quantity: quantity(l.total_quantity),
            unit_price: money(l.unit_price),
            total_price: money(l.total_price),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

fn print_per_meal_table(costs: &[PerMealCost]) {
    #[derive(Tabled)]
    struct CostRow {
        #[tabled(rename = "MealID")]
        meal_id: i64,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Total Meal Price (€)")]
        total: String,
        #[tabled(rename = "Price per Portion (€)")]
        per_portion: String,
    }

    let rows: Vec<CostRow> = costs
        .iter()
        .map(|c| CostRow {
            meal_id: c.meal_id,
            meal: truncate(&c.meal_name, 35),
            total: money(Some(c.total_meal_price)),
            per_portion: money(c.price_per_portion),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}
