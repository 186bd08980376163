use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::dates::{AnnotatedRecord, DISPLAY_FORMAT, parse_day_first};
use crate::error::EngineError;
use crate::filter::Selection;
use crate::models::{
    Ingredient, IngredientId, IngredientPriceRecord, Meal, MealId, MealIngredientLink,
    UnresolvedRef,
};

/// Key-indexed view over the meal and ingredient catalogs.
///
/// Building one fails with `DuplicateKey` if either catalog repeats an ID, so
/// every later lookup resolves to exactly one record.
#[derive(Debug)]
pub struct Catalog<'a> {
    meals: Vec<&'a Meal>,
    ingredients_by_id: HashMap<IngredientId, &'a Ingredient>,
    ingredient_ids_by_name: HashMap<&'a str, Vec<IngredientId>>,
}

impl<'a> Catalog<'a> {
    pub fn build(meals: &'a [Meal], ingredients: &'a [Ingredient]) -> Result<Self, EngineError> {
        let mut meal_ids = HashSet::with_capacity(meals.len());
        for meal in meals {
            if !meal_ids.insert(meal.meal_id) {
                return Err(EngineError::DuplicateKey {
                    table: "meals".to_string(),
                    key: meal.meal_id,
                });
            }
        }

        let mut ingredients_by_id = HashMap::with_capacity(ingredients.len());
        let mut ingredient_ids_by_name: HashMap<&str, Vec<IngredientId>> = HashMap::new();
        for ing in ingredients {
            if ingredients_by_id.insert(ing.ingredient_id, ing).is_some() {
                return Err(EngineError::DuplicateKey {
                    table: "ingredients".to_string(),
                    key: ing.ingredient_id,
                });
            }
            ingredient_ids_by_name
                .entry(ing.full_name.as_str())
                .or_default()
                .push(ing.ingredient_id);
        }

        Ok(Self {
            meals: meals.iter().collect(),
            ingredients_by_id,
            ingredient_ids_by_name,
        })
    }

    pub fn ingredient(&self, id: IngredientId) -> Option<&'a Ingredient> {
        self.ingredients_by_id.get(&id).copied()
    }

    /// The single catalog ID carrying this name, if exactly one does.
    pub fn ingredient_id_by_name(&self, name: &str) -> Option<IngredientId> {
        match self.ingredient_ids_by_name.get(name).map(Vec::as_slice) {
            Some([id]) => Some(*id),
            _ => None,
        }
    }

    /// Meals whose name is selected, in catalog order.
    ///
    /// Names are only used here, at the boundary with the user's selection. A
    /// name listed under several IDs selects all of them.
    pub fn meals_named(&self, names: &Selection<String>) -> Vec<&'a Meal> {
        self.meals
            .iter()
            .copied()
            .filter(|m| names.contains(&m.meal_name))
            .collect()
    }

    /// Distinct meal names in catalog order.
    pub fn meal_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.meals
            .iter()
            .filter(|m| seen.insert(m.meal_name.as_str()))
            .map(|m| m.meal_name.clone())
            .collect()
    }
}

/// Ingredients linked to any of `meal_ids`.
pub fn relevant_ingredients(
    links: &[MealIngredientLink],
    meal_ids: &BTreeSet<MealId>,
) -> BTreeSet<IngredientId> {
    links
        .iter()
        .filter(|l| meal_ids.contains(&l.meal_id))
        .map(|l| l.ingredient_id)
        .collect()
}

/// Earliest and latest parsed date among `rows`.
pub fn date_range(rows: &[AnnotatedRecord]) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates = rows.iter().filter_map(|r| r.date);
    let first = dates.next()?;
    Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngredientTrendPoint {
    pub ingredient_id: IngredientId,
    pub ingredient: String,
    #[serde(skip)]
    pub date: NaiveDate,
    pub display_date: String,
    pub latest_price: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct TrendJoin {
    pub points: Vec<IngredientTrendPoint>,
    pub malformed: Vec<EngineError>,
    /// History rows naming no catalog ingredient, or one shared by several IDs.
    pub unmatched: usize,
}

/// Ingredient price history for `relevant` ingredients within `range`
/// (inclusive), ordered by date then ingredient.
///
/// A history row is attributed through its own `IngredientID` when present,
/// otherwise through a name that must identify exactly one catalog entry.
pub fn ingredient_trend(
    history: &[IngredientPriceRecord],
    catalog: &Catalog<'_>,
    relevant: &BTreeSet<IngredientId>,
    range: Option<(NaiveDate, NaiveDate)>,
) -> TrendJoin {
    let mut out = TrendJoin::default();
    let Some((start, end)) = range else {
        return out;
    };

    for row in history {
        let id = row
            .ingredient_id
            .or_else(|| catalog.ingredient_id_by_name(&row.ingredient));
        let Some(id) = id else {
            out.unmatched += 1;
            continue;
        };
        if !relevant.contains(&id) {
            continue;
        }
        let date = match parse_day_first(&row.date) {
            Ok(d) => d,
            Err(e) => {
                out.malformed.push(e);
                continue;
            }
        };
        if date < start || date > end {
            continue;
        }
        out.points.push(IngredientTrendPoint {
            ingredient_id: id,
            ingredient: row.ingredient.clone(),
            date,
            display_date: date.format(DISPLAY_FORMAT).to_string(),
            latest_price: row.latest_price,
        });
    }

    if out.unmatched > 0 {
        tracing::warn!(
            rows = out.unmatched,
            "ingredient history rows could not be matched to a single catalog entry"
        );
    }
    out.points
        .sort_by(|a, b| (a.date, a.ingredient_id).cmp(&(b.date, b.ingredient_id)));
    out
}

/// One link row with its meal and ingredient resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedLink {
    pub meal_id: MealId,
    pub meal_name: String,
    pub ingredient_id: IngredientId,
    pub ingredient_name: Option<String>,
    pub quantity: f64,
    /// `None` when the ingredient has no catalog record or no price.
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ShoppingJoin {
    pub rows: Vec<JoinedLink>,
    pub unresolved: Vec<UnresolvedRef>,
}

/// Join the link rows of `meals` to the ingredient catalog.
///
/// Every link of a selected meal produces a row. A link to an unknown
/// ingredient keeps its quantity, takes the link's own name if it has one,
/// and carries no unit price; it is also listed in `unresolved`.
#[must_use]
pub fn join_shopping_rows(
    catalog: &Catalog<'_>,
    links: &[MealIngredientLink],
    meals: &[&Meal],
) -> ShoppingJoin {
    let selected: HashMap<MealId, &Meal> = meals.iter().map(|m| (m.meal_id, *m)).collect();
    let mut out = ShoppingJoin::default();

    for link in links {
        let Some(meal) = selected.get(&link.meal_id) else {
            continue;
        };
        let row = match catalog.ingredient(link.ingredient_id) {
            Some(ing) => JoinedLink {
                meal_id: meal.meal_id,
                meal_name: meal.meal_name.clone(),
                ingredient_id: ing.ingredient_id,
                ingredient_name: Some(ing.full_name.clone()),
                quantity: link.quantity,
                unit_price: ing.latest_price,
            },
            None => {
                let unresolved = UnresolvedRef {
                    meal_id: meal.meal_id,
                    ingredient_id: link.ingredient_id,
                };
                if !out.unresolved.contains(&unresolved) {
                    out.unresolved.push(unresolved);
                }
                JoinedLink {
                    meal_id: meal.meal_id,
                    meal_name: meal.meal_name.clone(),
                    ingredient_id: link.ingredient_id,
                    ingredient_name: link.full_name.clone(),
                    quantity: link.quantity,
                    unit_price: None,
                }
            }
        };
        out.rows.push(row);
    }

    if !out.unresolved.is_empty() {
        tracing::warn!(
            count = out.unresolved.len(),
            "meal ingredients missing from the ingredient catalog"
        );
    }
    tracing::debug!(links = out.rows.len(), meals = meals.len(), "joined shopping rows");
    out
}
