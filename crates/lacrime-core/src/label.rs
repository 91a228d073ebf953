//! Keyword-based proxy severity labels used to supervise regressor training.
//!
//! The categories are checked in a fixed priority order and the first match
//! decides the label. A narrative mentioning both a murder and a theft is an
//! 8, never a 2 and never a sum. The table below generated the training
//! labels of every persisted regressor, so it must not be reordered.

/// Upper bound of the severity scale.
pub const MAX_SEVERITY: u8 = 10;

/// Keyword category that produced a proxy label, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeverityCategory {
    ViolentLethal,
    AssaultWeapon,
    RobberyBurglary,
    FraudIdentity,
    Theft,
    /// No keyword matched.
    Unmatched,
}

/// Priority-ordered keyword table: first match wins.
const CATEGORIES: &[(SeverityCategory, &[&str])] = &[
    (
        SeverityCategory::ViolentLethal,
        &["murder", "homicide", "gun", "dead", "shoot"],
    ),
    (SeverityCategory::AssaultWeapon, &["assault", "weapon"]),
    (SeverityCategory::RobberyBurglary, &["robbery", "burglary"]),
    (SeverityCategory::FraudIdentity, &["fraud", "identity"]),
    (SeverityCategory::Theft, &["theft"]),
];

impl SeverityCategory {
    /// Proxy severity assigned to this category.
    pub fn score(&self) -> u8 {
        match self {
            Self::ViolentLethal => 8,
            Self::AssaultWeapon => 6,
            Self::RobberyBurglary => 5,
            Self::FraudIdentity => 3,
            Self::Theft => 2,
            Self::Unmatched => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ViolentLethal => "violent-lethal",
            Self::AssaultWeapon => "assault-weapon",
            Self::RobberyBurglary => "robbery-burglary",
            Self::FraudIdentity => "fraud-identity",
            Self::Theft => "theft",
            Self::Unmatched => "unmatched",
        }
    }

    /// Classify normalised text into its highest-priority category.
    ///
    /// Matching is plain substring containment, so "gunpoint" and
    /// "shooting" both hit the violent-lethal keywords.
    pub fn classify(text: &str) -> Self {
        CATEGORIES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
            .map(|(category, _)| *category)
            .unwrap_or(Self::Unmatched)
    }
}

/// Proxy severity label in `0..=10` for normalised text.
pub fn proxy_label(text: &str) -> u8 {
    SeverityCategory::classify(text).score().min(MAX_SEVERITY)
}
