use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::join::IngredientTrendPoint;
use larder_core::report::PriceTableRow;
use larder_core::service::LarderService;

use super::helpers::{FilterArgs, money, print_json, report_quality, truncate};

pub(crate) fn cmd_dashboard(
    service: &mut LarderService,
    filters: FilterArgs,
    json: bool,
) -> Result<()> {
    let report = service.dashboard(&filters.into_spec())?;

    if json {
        return print_json(&report);
    }

    report_quality(&report.quality);

    if report.price_table.is_empty() {
        eprintln!("No price records match the selected filters");
        process::exit(2);
    }

    println!("=== Meal prices ({} records) ===\n", report.record_count);
    print_price_table(&report.price_table);

    if !report.ingredient_trend.is_empty() {
        println!("\n=== Ingredient prices ===\n");
        print_trend_table(&report.ingredient_trend);
    }

    Ok(())
}

pub(crate) fn cmd_filters(
    service: &mut LarderService,
    filters: FilterArgs,
    json: bool,
) -> Result<()> {
    let options = service.filter_options(&filters.into_spec())?;

    if json {
        return print_json(&options);
    }

    println!("Meals:        {}", list(&options.meals));
    println!("Week numbers: {}", list(&options.week_numbers));
    println!("Years:        {}", list(&options.years));
    println!("Quarters:     {}", list(&options.quarters));
    println!("Months:       {}", list(&options.months));
    println!("Weeks:        {}", list(&options.weeks));
    println!("Days:         {}", list(&options.days));

    Ok(())
}

fn list<T: ToString>(values: &[T]) -> String {
    if values.is_empty() {
        return "-".to_string();
    }
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_price_table(rows: &[PriceTableRow]) {
    #[derive(Tabled)]
    struct PriceRow {
        #[tabled(rename = "Week")]
        week_nr: u32,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "MealID")]
        meal_id: i64,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Price (€)")]
        current_price: String,
        #[tabled(rename = "Savings (€)")]
        savings: String,
        #[tabled(rename = "Per Portion (€)")]
        per_portion: String,
    }

    let rows: Vec<PriceRow> = rows
        .iter()
        .map(|r| PriceRow {
            week_nr: r.week_nr,
            date: r.date.clone(),
            meal_id: r.meal_id,
            meal: truncate(&r.meal, 35),
            current_price: money(Some(r.current_price)),
            savings: money(r.savings_abs),
            per_portion: money(r.price_per_portion),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

fn print_trend_table(points: &[IngredientTrendPoint]) {
    #[derive(Tabled)]
    struct TrendRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Ingredient")]
        ingredient: String,
        #[tabled(rename = "Latest Price (€)")]
        latest_price: String,
    }

    let rows: Vec<TrendRow> = points
        .iter()
        .map(|p| TrendRow {
            date: p.display_date.clone(),
            ingredient: truncate(&p.ingredient, 35),
            latest_price: money(p.latest_price),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list() {
        assert_eq!(list::<u32>(&[]), "-");
        assert_eq!(list(&[2023, 2024]), "2023, 2024");
        assert_eq!(list(&["2024Q1".to_string()]), "2024Q1");
    }
}
