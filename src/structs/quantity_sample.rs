use std::fmt;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Identifiers for the quantity types a health store may expose.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum QuantityTypeId {
    DietaryWater,
}

impl fmt::Display for QuantityTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DietaryWater => f.write_str("dietary water"),
        }
    }
}

/// A quantity type handed out by a store that actually supports it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantityType {
    id: QuantityTypeId,
}

impl QuantityType {
    pub fn new(id: QuantityTypeId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> QuantityTypeId {
        self.id
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct QuantitySample {
    pub quantity_type: QuantityType,

    /// Amount of liquid in liters
    pub litres: f64,

    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QuantitySample {
    /// A sample taken at a single instant, `start == end == at`.
    pub fn instant(quantity_type: QuantityType, litres: f64, at: DateTime<Utc>) -> Self {
        Self {
            quantity_type,
            litres,
            start: at,
            end: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_sample_has_equal_bounds() {
        let at = Utc::now();
        let sample =
            QuantitySample::instant(QuantityType::new(QuantityTypeId::DietaryWater), 0.25, at);

        assert_eq!(sample.start, at);
        assert_eq!(sample.end, at);
        assert_eq!(sample.litres, 0.25);
    }

    #[test]
    fn type_ids_display_human_names() {
        assert_eq!(QuantityTypeId::DietaryWater.to_string(), "dietary water");
    }
}
