use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use csv::StringRecord;

use crate::error::EngineError;
use crate::models::{
    Ingredient, IngredientPriceRecord, Meal, MealIngredientLink, PriceRecord, Tables,
};

pub const PRICE_HISTORY_FILE: &str = "meal_prices_history.csv";
pub const MEALS_FILE: &str = "meals.csv";
pub const INGREDIENTS_FILE: &str = "ingredients.csv";
pub const LINKS_FILE: &str = "meals_ingredients.csv";
pub const INGREDIENT_HISTORY_FILE: &str = "ingredients_history.csv";

// Accepted header spellings per column; the first one is the canonical name.
const MEAL_ID: &[&str] = &["MealID", "Meal ID"];
const MEAL_NAME: &[&str] = &["Gerecht", "MealName", "Meal"];
const WEEK_NR: &[&str] = &["WeekNr", "Week Nr"];
const DATE: &[&str] = &["Date"];
const CURRENT_PRICE: &[&str] = &["MealPrice_Current", "CurrentPrice"];
const SAVINGS_ABS: &[&str] = &["Savings abs", "SavingsAbs"];
const PRICE_PER_PORTION: &[&str] = &["Price_per_portion", "PricePerPortion"];
const INGREDIENT_ID: &[&str] = &["IngredientID", "Ingredient ID"];
const FULL_NAME: &[&str] = &["FullName", "Full Name"];
const LATEST_PRICE: &[&str] = &["Latest price", "LatestPrice"];
const QUANTITY: &[&str] = &["Quantity"];
const INGREDIENT: &[&str] = &["Ingredient"];

/// Header row of one source table, with case-insensitive column lookup.
struct Header {
    table: &'static str,
    names: StringRecord,
}

impl Header {
    fn read<R: Read>(table: &'static str, rdr: &mut csv::Reader<R>) -> Result<Self> {
        let names = rdr
            .headers()
            .with_context(|| format!("Failed to read CSV headers of {table}"))?
            .clone();
        Ok(Self { table, names })
    }

    fn optional(&self, spellings: &[&str]) -> Option<usize> {
        spellings.iter().find_map(|want| {
            self.names
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(want))
        })
    }

    fn require(&self, spellings: &[&str]) -> Result<usize, EngineError> {
        self.optional(spellings)
            .ok_or_else(|| EngineError::SchemaMismatch {
                table: self.table.to_string(),
                column: spellings[0].to_string(),
            })
    }
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn is_blank(record: &StringRecord) -> bool {
    record.iter().all(|c| c.trim().is_empty())
}

fn text(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("").trim()
}

/// Spreadsheet exports write whole numbers as `3.0`; accept those for integer columns.
fn parse_int<T>(raw: &str) -> Option<T>
where
    T: FromStr + TryFrom<i64>,
{
    if let Ok(v) = raw.parse::<T>() {
        return Some(v);
    }
    // 2^63, the first whole number past i64::MAX
    const I64_END: f64 = 9_223_372_036_854_775_808.0;
    let f: f64 = raw.parse().ok()?;
    if f.fract() != 0.0 || !(-I64_END..I64_END).contains(&f) {
        return None;
    }
    T::try_from(f as i64).ok()
}

fn required_int<T>(record: &StringRecord, idx: usize, column: &str, line: usize) -> Result<T>
where
    T: FromStr + TryFrom<i64>,
{
    let raw = text(record, idx);
    parse_int(raw).with_context(|| format!("Row {line}: invalid {column} '{raw}'"))
}

fn optional_int<T>(
    record: &StringRecord,
    idx: Option<usize>,
    column: &str,
    line: usize,
) -> Result<Option<T>>
where
    T: FromStr + TryFrom<i64>,
{
    match idx.map(|i| text(record, i)).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => parse_int(raw)
            .map(Some)
            .with_context(|| format!("Row {line}: invalid {column} '{raw}'")),
    }
}

fn required_f64(record: &StringRecord, idx: usize, column: &str, line: usize) -> Result<f64> {
    let raw = text(record, idx);
    raw.parse::<f64>()
        .with_context(|| format!("Row {line}: invalid {column} '{raw}'"))
}

fn optional_f64(
    record: &StringRecord,
    idx: Option<usize>,
    column: &str,
    line: usize,
) -> Result<Option<f64>> {
    match idx.map(|i| text(record, i)).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("Row {line}: invalid {column} '{raw}'")),
    }
}

/// Run `parse_row` over every non-blank record. `line` is the 1-based line
/// number in the file, counting the header.
fn parse_rows<R, T, F>(
    table: &'static str,
    rdr: &mut csv::Reader<R>,
    mut parse_row: F,
) -> Result<Vec<T>>
where
    R: Read,
    F: FnMut(&StringRecord, usize) -> Result<T>,
{
    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let line = i + 2;
        let record = result.with_context(|| format!("Failed to parse {table} row {line}"))?;
        if is_blank(&record) {
            continue;
        }
        rows.push(parse_row(&record, line).with_context(|| format!("In {table}"))?);
    }
    Ok(rows)
}

/// Parse the meal price history.
///
/// Required: `MealID`, `Gerecht` (or `MealName`), `WeekNr`, `Date`,
/// `MealPrice_Current`. Optional: `Savings abs`, `Price_per_portion`.
/// Dates are kept as written; the normalizer parses them.
pub fn read_price_history<R: Read>(reader: R) -> Result<Vec<PriceRecord>> {
    let table = "meal_prices_history";
    let mut rdr = csv_reader(reader);
    let h = Header::read(table, &mut rdr)?;
    let meal_id = h.require(MEAL_ID)?;
    let meal_name = h.require(MEAL_NAME)?;
    let week_nr = h.require(WEEK_NR)?;
    let date = h.require(DATE)?;
    let current_price = h.require(CURRENT_PRICE)?;
    let savings = h.optional(SAVINGS_ABS);
    let per_portion = h.optional(PRICE_PER_PORTION);

    parse_rows(table, &mut rdr, |r, line| {
        Ok(PriceRecord {
            meal_id: required_int(r, meal_id, MEAL_ID[0], line)?,
            meal_name: text(r, meal_name).to_string(),
            week_nr: required_int(r, week_nr, WEEK_NR[0], line)?,
            date: text(r, date).to_string(),
            current_price: required_f64(r, current_price, CURRENT_PRICE[0], line)?,
            savings_abs: optional_f64(r, savings, SAVINGS_ABS[0], line)?,
            price_per_portion: optional_f64(r, per_portion, PRICE_PER_PORTION[0], line)?,
        })
    })
}

pub fn read_meals<R: Read>(reader: R) -> Result<Vec<Meal>> {
    let table = "meals";
    let mut rdr = csv_reader(reader);
    let h = Header::read(table, &mut rdr)?;
    let meal_id = h.require(MEAL_ID)?;
    let meal_name = h.require(MEAL_NAME)?;

    parse_rows(table, &mut rdr, |r, line| {
        let name = text(r, meal_name);
        if name.is_empty() {
            bail!("Row {line}: empty meal name");
        }
        Ok(Meal {
            meal_id: required_int(r, meal_id, MEAL_ID[0], line)?,
            meal_name: name.to_string(),
        })
    })
}

/// Parse the ingredient catalog. A blank `Latest price` is a missing price.
pub fn read_ingredients<R: Read>(reader: R) -> Result<Vec<Ingredient>> {
    let table = "ingredients";
    let mut rdr = csv_reader(reader);
    let h = Header::read(table, &mut rdr)?;
    let ingredient_id = h.require(INGREDIENT_ID)?;
    let full_name = h.require(FULL_NAME)?;
    let latest_price = h.require(LATEST_PRICE)?;

    parse_rows(table, &mut rdr, |r, line| {
        Ok(Ingredient {
            ingredient_id: required_int(r, ingredient_id, INGREDIENT_ID[0], line)?,
            full_name: text(r, full_name).to_string(),
            latest_price: optional_f64(r, Some(latest_price), LATEST_PRICE[0], line)?,
        })
    })
}

pub fn read_links<R: Read>(reader: R) -> Result<Vec<MealIngredientLink>> {
    let table = "meals_ingredients";
    let mut rdr = csv_reader(reader);
    let h = Header::read(table, &mut rdr)?;
    let meal_id = h.require(MEAL_ID)?;
    let ingredient_id = h.require(INGREDIENT_ID)?;
    let quantity = h.require(QUANTITY)?;
    let full_name = h.optional(FULL_NAME);

    parse_rows(table, &mut rdr, |r, line| {
        Ok(MealIngredientLink {
            meal_id: required_int(r, meal_id, MEAL_ID[0], line)?,
            ingredient_id: required_int(r, ingredient_id, INGREDIENT_ID[0], line)?,
            quantity: required_f64(r, quantity, QUANTITY[0], line)?,
            full_name: full_name
                .map(|i| text(r, i))
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    })
}

pub fn read_ingredient_history<R: Read>(reader: R) -> Result<Vec<IngredientPriceRecord>> {
    let table = "ingredients_history";
    let mut rdr = csv_reader(reader);
    let h = Header::read(table, &mut rdr)?;
    let ingredient = h.require(INGREDIENT)?;
    let date = h.require(DATE)?;
    let latest_price = h.require(LATEST_PRICE)?;
    let ingredient_id = h.optional(INGREDIENT_ID);

    parse_rows(table, &mut rdr, |r, line| {
        Ok(IngredientPriceRecord {
            ingredient_id: optional_int(r, ingredient_id, INGREDIENT_ID[0], line)?,
            ingredient: text(r, ingredient).to_string(),
            date: text(r, date).to_string(),
            latest_price: optional_f64(r, Some(latest_price), LATEST_PRICE[0], line)?,
        })
    })
}

fn open(dir: &Path, name: &str) -> Result<File> {
    let path = dir.join(name);
    File::open(&path).with_context(|| format!("Failed to open file: {}", path.display()))
}

/// Read all five source tables from `dir`, uncached.
pub fn read_tables(dir: &Path) -> Result<Tables> {
    let tables = Tables {
        price_history: read_price_history(open(dir, PRICE_HISTORY_FILE)?)?,
        meals: read_meals(open(dir, MEALS_FILE)?)?,
        ingredients: read_ingredients(open(dir, INGREDIENTS_FILE)?)?,
        links: read_links(open(dir, LINKS_FILE)?)?,
        ingredient_history: read_ingredient_history(open(dir, INGREDIENT_HISTORY_FILE)?)?,
    };
    tracing::debug!(
        dir = %dir.display(),
        price_rows = tables.price_history.len(),
        meals = tables.meals.len(),
        ingredients = tables.ingredients.len(),
        links = tables.links.len(),
        history_rows = tables.ingredient_history.len(),
        "loaded source tables"
    );
    Ok(tables)
}

/// Read-through cache of loaded tables, keyed by source directory.
///
/// Entries live until [`DataLoader::invalidate`] or
/// [`DataLoader::invalidate_all`] is called; the loader never checks the files
/// for changes on its own.
#[derive(Debug, Default)]
pub struct DataLoader {
    cache: HashMap<PathBuf, Arc<Tables>>,
}

impl DataLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, dir: &Path) -> Result<Arc<Tables>> {
        if let Some(tables) = self.cache.get(dir) {
            return Ok(Arc::clone(tables));
        }
        let tables = Arc::new(read_tables(dir)?);
        self.cache.insert(dir.to_path_buf(), Arc::clone(&tables));
        Ok(tables)
    }

    /// Drop the cached tables for `dir`. Returns whether anything was cached.
    pub fn invalidate(&mut self, dir: &Path) -> bool {
        self.cache.remove(dir).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    pub fn is_cached(&self, dir: &Path) -> bool {
        self.cache.contains_key(dir)
    }
}
