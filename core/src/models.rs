use serde::{Deserialize, Serialize};

pub type MealId = i64;
pub type IngredientId = i64;

// --- Source tables ---

/// One priced meal on one date, from the meal price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub meal_id: MealId,
    pub meal_name: String,
    pub week_nr: u32,
    /// Raw day-first date string as it appears in the source.
    pub date: String,
    pub current_price: f64,
    pub savings_abs: Option<f64>,
    pub price_per_portion: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meal {
    pub meal_id: MealId,
    pub meal_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub ingredient_id: IngredientId,
    pub full_name: String,
    /// `None` when the catalog has no price. Never read as zero.
    pub latest_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientPriceRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_id: Option<IngredientId>,
    pub ingredient: String,
    pub date: String,
    pub latest_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealIngredientLink {
    pub meal_id: MealId,
    pub ingredient_id: IngredientId,
    pub quantity: f64,
    // Fallback name when the ingredient catalog has no record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// All source tables for one report invocation.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub price_history: Vec<PriceRecord>,
    pub meals: Vec<Meal>,
    pub ingredients: Vec<Ingredient>,
    pub links: Vec<MealIngredientLink>,
    pub ingredient_history: Vec<IngredientPriceRecord>,
}

// --- Derived rows ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingListLine {
    pub meal_id: MealId,
    pub meal_name: String,
    pub ingredient_id: IngredientId,
    pub ingredient_name: Option<String>,
    pub total_quantity: f64,
    pub unit_price: Option<f64>,
    /// `round(total_quantity * unit_price, 2)`, missing when the unit price is.
    pub total_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerMealCost {
    pub meal_id: MealId,
    pub meal_name: String,
    pub total_meal_price: f64,
    pub price_per_portion: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnresolvedRef {
    pub meal_id: MealId,
    pub ingredient_id: IngredientId,
}

/// Data-quality findings recovered from during a computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataQuality {
    /// Raw values of dates that could not be parsed.
    pub malformed_dates: Vec<String>,
    pub unresolved_ingredients: Vec<UnresolvedRef>,
    /// Ingredient history rows whose ingredient could not be matched to a
    /// single catalog entry.
    pub unmatched_history_rows: usize,
}

impl DataQuality {
    pub fn is_clean(&self) -> bool {
        self.malformed_dates.is_empty()
            && self.unresolved_ingredients.is_empty()
            && self.unmatched_history_rows == 0
    }
}
