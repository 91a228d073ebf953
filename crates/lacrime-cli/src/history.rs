//! Per-session record of scored profiles.

use chrono::{DateTime, Utc};
use lacrime_ai::Prediction;
use lacrime_core::CrimeProfile;

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub recorded_at: DateTime<Utc>,
    pub crime: String,
    pub area: String,
    pub final_score: f64,
    pub refined: bool,
    pub narrative: String,
}

/// Predictions made during one `session` run, in arrival order.
#[derive(Debug, Default)]
pub struct SessionHistory {
    entries: Vec<HistoryEntry>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, profile: &CrimeProfile, prediction: &Prediction) {
        self.entries.push(HistoryEntry {
            recorded_at: Utc::now(),
            crime: profile.crime_description.clone(),
            area: profile.area_name.clone(),
            final_score: prediction.final_score,
            refined: prediction.refined,
            narrative: prediction.narrative.clone(),
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries by final score, highest first. Ties keep arrival order.
    pub fn ranked(&self) -> Vec<&HistoryEntry> {
        let mut ranked: Vec<&HistoryEntry> = self.entries.iter().collect();
        ranked.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(crime: &str) -> CrimeProfile {
        serde_json::from_value(serde_json::json!({
            "victim_age": 40, "victim_sex": "F", "victim_descent": "H",
            "crime_description": crime, "premise": "Street",
            "area_name": "Central", "time_of_day": "Evening",
            "day_of_week": "Friday", "month": 7, "year": 2023,
            "weapon": "None"
        }))
        .unwrap()
    }

    fn prediction(score: f64) -> Prediction {
        Prediction {
            final_score: score,
            tips: vec![],
            narrative: format!("narrative scored {score}"),
            model_score: score,
            refined: false,
        }
    }

    #[test]
    fn ranks_by_score_descending() {
        let mut history = SessionHistory::new();
        assert!(history.is_empty());

        history.record(&profile("Theft"), &prediction(2.1));
        history.record(&profile("Homicide"), &prediction(8.75));
        history.record(&profile("Burglary"), &prediction(5.0));

        let ranked = history.ranked();
        assert_eq!(history.len(), 3);
        let crimes: Vec<&str> = ranked.iter().map(|e| e.crime.as_str()).collect();
        assert_eq!(crimes, ["Homicide", "Burglary", "Theft"]);
    }

    #[test]
    fn ties_keep_arrival_order() {
        let mut history = SessionHistory::new();
        history.record(&profile("First"), &prediction(5.0));
        history.record(&profile("Second"), &prediction(5.0));
        history.record(&profile("Top"), &prediction(9.0));

        let crimes: Vec<&str> = history.ranked().iter().map(|e| e.crime.as_str()).collect();
        assert_eq!(crimes, ["Top", "First", "Second"]);
    }
}
