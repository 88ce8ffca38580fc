//! Business-type profiles.
//!
//! One static table drives both detection filtering and the analytics counters.
//! Adding a business type means adding a row here; no code changes elsewhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::geometry::Zone;

/// Product classes counted together by the supermarket `product_count`.
pub const SUPERMARKET_PRODUCTS: &[&str] = &[
    "bottle", "cup", "bowl", "banana", "apple", "orange", "sandwich", "carrot",
];

const MEDICINE: &[&str] = &["bottle", "cup", "bowl"];

const ALL_ZONES: &[Zone] = &[Zone::Entrance, Zone::Middle, Zone::Exit];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusinessType {
    #[default]
    Supermarket,
    Pharmacy,
    Condominium,
}

impl BusinessType {
    pub const ALL: [BusinessType; 3] = [
        BusinessType::Supermarket,
        BusinessType::Pharmacy,
        BusinessType::Condominium,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessType::Supermarket => "supermarket",
            BusinessType::Pharmacy => "pharmacy",
            BusinessType::Condominium => "condominium",
        }
    }

    pub fn profile(&self) -> &'static BusinessProfile {
        match self {
            BusinessType::Supermarket => &SUPERMARKET,
            BusinessType::Pharmacy => &PHARMACY,
            BusinessType::Condominium => &CONDOMINIUM,
        }
    }
}

impl fmt::Display for BusinessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusinessType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        BusinessType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| PipelineError::InvalidBusinessType(s.to_string()))
    }
}

/// A windowed counter and the threshold that triggers its warning.
#[derive(Debug)]
pub struct MetricRule {
    pub name: &'static str,
    /// Classes that feed this counter.
    pub classes: &'static [&'static str],
    /// Warning fires when the count is strictly greater than this.
    pub threshold: u64,
    pub warning: &'static str,
}

impl MetricRule {
    pub fn counts(&self, class_name: &str) -> bool {
        self.classes.contains(&class_name)
    }
}

/// Detector class admitted for a business type, with its own confidence floor.
#[derive(Debug)]
pub struct ClassFilter {
    pub class_name: &'static str,
    pub min_confidence: f32,
}

#[derive(Debug)]
pub struct BusinessProfile {
    pub business_type: BusinessType,
    pub zones: &'static [Zone],
    pub metrics: &'static [MetricRule],
    pub classes: &'static [ClassFilter],
}

impl BusinessProfile {
    /// Whether a detection of `class_name` at `confidence` is relevant here.
    pub fn admits(&self, class_name: &str, confidence: f32) -> bool {
        self.classes
            .iter()
            .any(|c| c.class_name == class_name && confidence >= c.min_confidence)
    }

    pub fn metric(&self, name: &str) -> Option<&'static MetricRule> {
        self.metrics.iter().find(|m| m.name == name)
    }
}

const fn class(class_name: &'static str, min_confidence: f32) -> ClassFilter {
    ClassFilter {
        class_name,
        min_confidence,
    }
}

const fn rule(
    name: &'static str,
    classes: &'static [&'static str],
    threshold: u64,
    warning: &'static str,
) -> MetricRule {
    MetricRule {
        name,
        classes,
        threshold,
        warning,
    }
}

static SUPERMARKET: BusinessProfile = BusinessProfile {
    business_type: BusinessType::Supermarket,
    zones: ALL_ZONES,
    metrics: &[
        rule("person_count", &["person"], 20, "High movement"),
        rule("cart_count", &["shopping cart"], 10, "Many carts in use"),
        rule("product_count", SUPERMARKET_PRODUCTS, 50, "High product volume"),
        rule("backpack_count", &["backpack"], 5, "High number of backpacks"),
        rule("handbag_count", &["handbag"], 5, "High number of handbags"),
        rule("cellphone_count", &["cell phone"], 8, "High phone usage"),
    ],
    classes: &[
        class("person", 0.5),
        class("shopping cart", 0.4),
        class("backpack", 0.4),
        class("handbag", 0.4),
        class("cell phone", 0.4),
        class("bottle", 0.3),
        class("wine glass", 0.3),
        class("cup", 0.3),
        class("fork", 0.3),
        class("knife", 0.3),
        class("spoon", 0.3),
        class("bowl", 0.3),
        class("banana", 0.3),
        class("apple", 0.3),
        class("orange", 0.3),
        class("sandwich", 0.3),
        class("carrot", 0.3),
    ],
};

static PHARMACY: BusinessProfile = BusinessProfile {
    business_type: BusinessType::Pharmacy,
    zones: ALL_ZONES,
    metrics: &[
        rule("person_count", &["person"], 10, "High movement"),
        rule("prescription_count", &["book"], 5, "High prescription volume"),
        rule("medicine_count", MEDICINE, 20, "High medicine volume"),
        rule("backpack_count", &["backpack"], 3, "High number of backpacks"),
        rule("handbag_count", &["handbag"], 3, "High number of handbags"),
        rule("chair_count", &["chair"], 4, "High chair usage"),
    ],
    classes: &[
        class("person", 0.5),
        class("backpack", 0.4),
        class("handbag", 0.4),
        class("chair", 0.4),
        class("bottle", 0.3),
        class("cell phone", 0.4),
        class("book", 0.3),
        class("cup", 0.3),
        class("bowl", 0.3),
        class("bench", 0.3),
    ],
};

static CONDOMINIUM: BusinessProfile = BusinessProfile {
    business_type: BusinessType::Condominium,
    zones: ALL_ZONES,
    metrics: &[
        rule("person_count", &["person"], 15, "High movement"),
        rule("car_count", &["car"], 5, "High vehicle flow"),
        rule("bicycle_count", &["bicycle"], 3, "High bicycle flow"),
        rule("dog_count", &["dog"], 2, "High number of dogs"),
        rule("cat_count", &["cat"], 2, "High number of cats"),
        rule("backpack_count", &["backpack"], 4, "High number of backpacks"),
    ],
    classes: &[
        class("person", 0.5),
        class("car", 0.4),
        class("truck", 0.4),
        class("motorcycle", 0.4),
        class("bicycle", 0.3),
        class("dog", 0.4),
        class("cat", 0.4),
        class("backpack", 0.4),
        class("handbag", 0.4),
        class("suitcase", 0.4),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_business_types() {
        assert_eq!("supermarket".parse::<BusinessType>().unwrap(), BusinessType::Supermarket);
        assert_eq!(" Pharmacy ".parse::<BusinessType>().unwrap(), BusinessType::Pharmacy);
        assert_eq!("condominium".parse::<BusinessType>().unwrap(), BusinessType::Condominium);
    }

    #[test]
    fn unknown_business_type_is_rejected() {
        let err = "bakery".parse::<BusinessType>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidBusinessType(ref t) if t == "bakery"));
    }

    #[test]
    fn every_profile_has_six_metrics_and_three_zones() {
        for t in BusinessType::ALL {
            let p = t.profile();
            assert_eq!(p.business_type, t);
            assert_eq!(p.metrics.len(), 6);
            assert_eq!(p.zones, ALL_ZONES);
            assert!(p.metric("person_count").is_some());
        }
    }

    #[test]
    fn supermarket_thresholds() {
        let p = BusinessType::Supermarket.profile();
        assert_eq!(p.metric("person_count").unwrap().threshold, 20);
        assert_eq!(p.metric("cart_count").unwrap().threshold, 10);
        assert_eq!(p.metric("product_count").unwrap().threshold, 50);
        assert!(p.metric("product_count").unwrap().counts("banana"));
    }

    #[test]
    fn every_counted_class_is_admitted() {
        for t in BusinessType::ALL {
            let p = t.profile();
            for m in p.metrics {
                for c in m.classes {
                    assert!(p.admits(c, 1.0), "{} does not admit {}", t, c);
                }
            }
        }
    }

    #[test]
    fn per_class_confidence_floor() {
        let p = BusinessType::Supermarket.profile();
        assert!(!p.admits("person", 0.45));
        assert!(p.admits("person", 0.5));
        assert!(p.admits("cup", 0.31));
        assert!(!p.admits("car", 0.99));
    }
}
