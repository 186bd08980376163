use thiserror::Error;

/// Engine failures.
///
/// `SchemaMismatch` and `DuplicateKey` are structural and abort a computation.
/// `MalformedDate` and `UnresolvedIngredient` are data-quality findings: the
/// pipeline recovers from them locally and reports them in a
/// [`DataQuality`](crate::models::DataQuality) summary, but they are also
/// returned as errors by the strict entry points (`parse_day_first`,
/// `ShoppingList::require_priced`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Cannot parse date: '{value}'")]
    MalformedDate { value: String },

    #[error("Missing required column '{column}' in {table}")]
    SchemaMismatch { table: String, column: String },

    #[error("Ingredient {ingredient_id} used by meal {meal_id} has no catalog entry")]
    UnresolvedIngredient { meal_id: i64, ingredient_id: i64 },

    #[error("Duplicate key {key} in {table}")]
    DuplicateKey { table: String, key: i64 },
}

impl EngineError {
    /// Structural errors invalidate the whole computation.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::SchemaMismatch { .. } | Self::DuplicateKey { .. })
    }
}
