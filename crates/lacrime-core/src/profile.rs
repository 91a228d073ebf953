//! Structured crime profiles and their deterministic narrative rendering.
//!
//! A [`CrimeProfile`] is what a caller fills in; [`compose_narrative`] turns
//! it into the paragraph the embedder and the LLM read. The sentence template
//! mirrors the wording of the training corpus narratives, so changing it
//! shifts the regressor's input distribution.

use std::fmt;

use serde::Deserialize;

use crate::mocode::MocodeTable;

// ── Enumerations ──

/// Victim sex, parsed from the single-letter LAPD code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Sex {
    Male,
    Female,
    Unknown,
}

impl Sex {
    /// Total mapping from a code (`M`, `F`, `X`, ...). Unrecognised codes are `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "M" => Self::Male,
            "F" => Self::Female,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Unknown => "Unknown",
        }
    }
}

impl From<String> for Sex {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

/// Victim descent, parsed from the single-letter LAPD code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Descent {
    OtherAsian,
    Black,
    Chinese,
    Cambodian,
    Filipino,
    Guamanian,
    HispanicLatinMexican,
    AmericanIndianAlaskanNative,
    Japanese,
    Korean,
    Laotian,
    Other,
    PacificIslander,
    Samoan,
    Hawaiian,
    Vietnamese,
    White,
    AsianIndian,
    /// `X` in the source data, and any unrecognised code.
    Unknown,
}

impl Descent {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "A" => Self::OtherAsian,
            "B" => Self::Black,
            "C" => Self::Chinese,
            "D" => Self::Cambodian,
            "F" => Self::Filipino,
            "G" => Self::Guamanian,
            "H" => Self::HispanicLatinMexican,
            "I" => Self::AmericanIndianAlaskanNative,
            "J" => Self::Japanese,
            "K" => Self::Korean,
            "L" => Self::Laotian,
            "O" => Self::Other,
            "P" => Self::PacificIslander,
            "S" => Self::Samoan,
            "U" => Self::Hawaiian,
            "V" => Self::Vietnamese,
            "W" => Self::White,
            "Z" => Self::AsianIndian,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OtherAsian => "Other Asian",
            Self::Black => "Black",
            Self::Chinese => "Chinese",
            Self::Cambodian => "Cambodian",
            Self::Filipino => "Filipino",
            Self::Guamanian => "Guamanian",
            Self::HispanicLatinMexican => "Hispanic/Latin/Mexican",
            Self::AmericanIndianAlaskanNative => "American Indian/Alaskan Native",
            Self::Japanese => "Japanese",
            Self::Korean => "Korean",
            Self::Laotian => "Laotian",
            Self::Other => "Other",
            Self::PacificIslander => "Pacific Islander",
            Self::Samoan => "Samoan",
            Self::Hawaiian => "Hawaiian",
            Self::Vietnamese => "Vietnamese",
            Self::White => "White",
            Self::AsianIndian => "Asian Indian",
            Self::Unknown => "Unknown",
        }
    }
}

impl From<String> for Descent {
    fn from(code: String) -> Self {
        Self::from_code(&code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
    Unknown,
}

impl TimeOfDay {
    pub fn from_label(label: &str) -> Self {
        match label.trim() {
            "Morning" => Self::Morning,
            "Afternoon" => Self::Afternoon,
            "Evening" => Self::Evening,
            "Night" => Self::Night,
            _ => Self::Unknown,
        }
    }

    /// Lowercase phrase used inside the narrative ("night hours").
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
            Self::Unknown => "unknown",
        }
    }
}

impl From<String> for TimeOfDay {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
    Unknown,
}

impl Season {
    /// Dec–Feb winter, Mar–May spring, Jun–Aug summer, Sep–Nov fall.
    pub fn from_month(month: u32) -> Self {
        match month {
            12 | 1 | 2 => Self::Winter,
            3..=5 => Self::Spring,
            6..=8 => Self::Summer,
            9..=11 => Self::Fall,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Winter => "Winter",
            Self::Spring => "Spring",
            Self::Summer => "Summer",
            Self::Fall => "Fall",
            Self::Unknown => "Unknown",
        }
    }
}

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Month name for `1..=12`, `"Unknown"` otherwise.
pub fn month_name(month: u32) -> &'static str {
    month
        .checked_sub(1)
        .and_then(|i| MONTH_NAMES.get(i as usize))
        .copied()
        .unwrap_or("Unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeGroup {
    Child,
    Adult,
    Senior,
}

impl AgeGroup {
    /// `<18` child, `18..=60` adult, `>60` senior.
    pub fn from_age(age: u32) -> Self {
        match age {
            0..=17 => Self::Child,
            18..=60 => Self::Adult,
            _ => Self::Senior,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Adult => "adult",
            Self::Senior => "senior",
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Profile ──

/// Structured description of a single reported crime.
///
/// Deserializes from the JSON shape the CLI accepts, with sex, descent and
/// time of day given as their raw codes/labels:
///
/// ```json
/// {"victim_age": 32, "victim_sex": "M", "victim_descent": "W",
///  "crime_description": "Burglary", "premise": "Residence",
///  "area_name": "Hollywood", "time_of_day": "Night", "day_of_week": "Sunday",
///  "month": 3, "year": 2024, "mocodes": "1300 0344", "weapon": "Knife"}
/// ```
///
/// `month` must be in `1..=12`; that is the caller's responsibility.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CrimeProfile {
    pub victim_age: u32,
    pub victim_sex: Sex,
    pub victim_descent: Descent,
    pub crime_description: String,
    pub premise: String,
    pub area_name: String,
    pub time_of_day: TimeOfDay,
    pub day_of_week: String,
    pub month: u32,
    pub year: i32,
    /// Whitespace-separated MOCODEs, e.g. `"1300 0344"`.
    #[serde(default)]
    pub mocodes: String,
    pub weapon: String,
}

/// Render a profile into its narrative paragraph.
///
/// Four sentences joined by single spaces: victim demographics, crime and
/// premise, time and area, suspect behaviour and weapon.
pub fn compose_narrative(profile: &CrimeProfile, mocodes: &MocodeTable) -> String {
    let age_group = AgeGroup::from_age(profile.victim_age);
    let mocode_text = mocodes.render(&profile.mocodes);

    [
        format!(
            "The victim was an {age_group} individual (age {age}), identified as {sex} of {descent} descent.",
            age = profile.victim_age,
            sex = profile.victim_sex.as_str(),
            descent = profile.victim_descent.as_str(),
        ),
        format!(
            "They were involved in a reported case of {crime}, which occurred at a {premise}.",
            crime = profile.crime_description.to_lowercase(),
            premise = profile.premise.to_lowercase(),
        ),
        format!(
            "The incident took place during the {time} hours, in {month} ({season} season), on a {day} in the year {year}, within the {area} area.",
            time = profile.time_of_day.as_str(),
            month = month_name(profile.month),
            season = Season::from_month(profile.month).as_str(),
            day = profile.day_of_week,
            year = profile.year,
            area = profile.area_name,
        ),
        format!(
            "The suspect's behavior included: {behavior}, and the weapon used was: {weapon}.",
            behavior = mocode_text.to_lowercase(),
            weapon = profile.weapon.to_lowercase(),
        ),
    ]
    .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile() -> CrimeProfile {
        CrimeProfile {
            victim_age: 32,
            victim_sex: Sex::from_code("M"),
            victim_descent: Descent::from_code("W"),
            crime_description: "Burglary".into(),
            premise: "Residence".into(),
            area_name: "Hollywood".into(),
            time_of_day: TimeOfDay::Night,
            day_of_week: "Sunday".into(),
            month: 3,
            year: 2024,
            mocodes: "1300 0344".into(),
            weapon: "Knife".into(),
        }
    }

    fn sample_table() -> MocodeTable {
        [("1300", "Theft"), ("0344", "Removes vict property")]
            .into_iter()
            .collect()
    }

    #[test]
    fn age_group_boundaries() {
        assert_eq!(AgeGroup::from_age(17), AgeGroup::Child);
        assert_eq!(AgeGroup::from_age(18), AgeGroup::Adult);
        assert_eq!(AgeGroup::from_age(60), AgeGroup::Adult);
        assert_eq!(AgeGroup::from_age(61), AgeGroup::Senior);
        assert_eq!(AgeGroup::from_age(0), AgeGroup::Child);
    }

    #[test]
    fn season_table() {
        assert_eq!(Season::from_month(12), Season::Winter);
        assert_eq!(Season::from_month(2), Season::Winter);
        assert_eq!(Season::from_month(3), Season::Spring);
        assert_eq!(Season::from_month(8), Season::Summer);
        assert_eq!(Season::from_month(11), Season::Fall);
        assert_eq!(Season::from_month(13), Season::Unknown);
    }

    #[test]
    fn month_names() {
        assert_eq!(month_name(1), "January");
        assert_eq!(month_name(12), "December");
        assert_eq!(month_name(0), "Unknown");
        assert_eq!(month_name(13), "Unknown");
    }

    #[test]
    fn unrecognised_codes_are_unknown() {
        assert_eq!(Sex::from_code("X"), Sex::Unknown);
        assert_eq!(Sex::from_code("q"), Sex::Unknown);
        assert_eq!(Sex::from_code("f"), Sex::Female);
        assert_eq!(Descent::from_code("X"), Descent::Unknown);
        assert_eq!(Descent::from_code("?"), Descent::Unknown);
        assert_eq!(Descent::from_code("h").as_str(), "Hispanic/Latin/Mexican");
        assert_eq!(TimeOfDay::from_label("Dawn"), TimeOfDay::Unknown);
    }

    #[test]
    fn narrative_contains_expected_phrases() {
        let text = compose_narrative(&sample_profile(), &sample_table());
        for needle in [
            "adult individual (age 32)",
            "Male",
            "White descent",
            "burglary",
            "residence",
            "night hours",
            "March (Spring season)",
            "Hollywood area",
            "on a Sunday in the year 2024",
            "theft, removes vict property",
            "the weapon used was: knife.",
        ] {
            assert!(text.contains(needle), "missing {needle:?} in {text:?}");
        }
    }

    #[test]
    fn narrative_is_four_sentences() {
        let text = compose_narrative(&sample_profile(), &sample_table());
        assert!(text.starts_with("The victim was an adult individual"));
        assert_eq!(text.matches(". ").count(), 3);
        assert!(!text.contains("  "));
    }

    #[test]
    fn unknown_mocode_rendered_lowercase_in_clause() {
        let mut profile = sample_profile();
        profile.mocodes = "1300 9999".into();
        let only_theft: MocodeTable = [("1300", "Theft")].into_iter().collect();
        let text = compose_narrative(&profile, &only_theft);
        assert!(text.contains("The suspect's behavior included: theft, unknown(9999),"));
    }

    #[test]
    fn narrative_is_deterministic() {
        let a = compose_narrative(&sample_profile(), &sample_table());
        let b = compose_narrative(&sample_profile(), &sample_table());
        assert_eq!(a, b);
    }

    #[test]
    fn deserializes_from_raw_codes() {
        let json = r#"{
            "victim_age": 70, "victim_sex": "F", "victim_descent": "K",
            "crime_description": "Robbery", "premise": "Street",
            "area_name": "Central", "time_of_day": "Morning",
            "day_of_week": "Monday", "month": 7, "year": 2023,
            "mocodes": "0416", "weapon": "None"
        }"#;
        let profile: CrimeProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.victim_sex, Sex::Female);
        assert_eq!(profile.victim_descent, Descent::Korean);
        assert_eq!(profile.time_of_day, TimeOfDay::Morning);

        let text = compose_narrative(&profile, &MocodeTable::new());
        assert!(text.contains("senior individual (age 70)"));
        assert!(text.contains("July (Summer season)"));
        assert!(text.contains("unknown(0416)"));
    }

    #[test]
    fn missing_mocodes_default_to_empty() {
        let json = r#"{
            "victim_age": 5, "victim_sex": "X", "victim_descent": "X",
            "crime_description": "Theft", "premise": "Park",
            "area_name": "Newton", "time_of_day": "Evening",
            "day_of_week": "Friday", "month": 1, "year": 2022,
            "weapon": "none"
        }"#;
        let profile: CrimeProfile = serde_json::from_str(json).unwrap();
        assert!(profile.mocodes.is_empty());
        let text = compose_narrative(&profile, &MocodeTable::new());
        assert!(text.contains("child individual (age 5), identified as Unknown of Unknown descent."));
        assert!(text.contains("behavior included: , and"));
    }
}
