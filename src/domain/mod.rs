//! Domain layer: the typed documents this tool ingests.

pub mod product;

pub use product::{Currency, Dimensions, Product};
