mod dashboard;
mod helpers;
mod shopping;

pub(crate) use dashboard::{cmd_dashboard, cmd_filters};
pub(crate) use helpers::FilterArgs;
pub(crate) use shopping::{cmd_meals, cmd_shopping_list};
