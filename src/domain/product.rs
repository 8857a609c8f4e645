//! Product documents written by the batch writer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;

/// Currency a product is priced in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Swedish krona.
    Sek,
    /// Euro.
    Eur,
    /// US dollar.
    Usd,
}

impl Currency {
    /// ISO 4217 code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Sek => "SEK",
            Self::Eur => "EUR",
            Self::Usd => "USD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEK" => Ok(Self::Sek),
            "EUR" => Ok(Self::Eur),
            "USD" => Ok(Self::Usd),
            other => Err(PoolError::InvalidRequest(format!(
                "unsupported currency '{other}'"
            ))),
        }
    }
}

/// Physical size of a product, in centimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width.
    pub width_cm: f64,
    /// Height.
    pub height_cm: f64,
    /// Depth.
    pub depth_cm: f64,
}

/// A product as stored in the `product` JSONB column.
///
/// Optional fields are omitted from the document when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Business key; unique across the table.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Unit price in `currency`.
    pub price: f64,
    /// Pricing currency.
    pub currency: Currency,
    /// Catalogue category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Manufacturer or label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Physical size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

impl Product {
    /// Creates a product with only the required fields set.
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        name: impl Into<String>,
        price: f64,
        currency: Currency,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            name: name.into(),
            price,
            currency,
            category: None,
            brand: None,
            tags: None,
            dimensions: None,
        }
    }
}
