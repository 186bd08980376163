pub mod aggregate;
pub mod dates;
pub mod error;
pub mod filter;
pub mod join;
pub mod loader;
pub mod models;
pub mod report;
pub mod service;
