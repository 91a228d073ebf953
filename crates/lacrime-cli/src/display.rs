//! Human-readable rendering of predictions and session history.

use lacrime_ai::Prediction;

use crate::history::SessionHistory;

/// Narrative excerpt length in the history listing.
const EXCERPT_CHARS: usize = 100;

/// Render a single prediction as a card: score, narrative, then tips.
pub fn prediction_card(p: &Prediction) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== Severity {:.2}/10 ===\n", p.final_score));
    if p.refined {
        out.push_str(&format!("  {:<14} {:.2}\n", "model score", p.model_score));
    } else {
        out.push_str("  (LLM refinement unavailable; showing model score)\n");
    }
    out.push('\n');

    out.push_str("Crime profile\n");
    out.push_str(&format!("  {}\n", p.narrative));

    if !p.tips.is_empty() {
        out.push('\n');
        out.push_str("Awareness tips\n");
        for tip in &p.tips {
            out.push_str(&format!("  - {tip}\n"));
        }
    }

    out
}

/// Render the history, most severe first.
pub fn history_listing(history: &SessionHistory) -> String {
    if history.is_empty() {
        return "No crime history yet.\n".to_string();
    }

    let mut out = format!(
        "Crime history ({}), by severity; * = model score, not refined\n",
        history.len()
    );
    for (i, entry) in history.ranked().into_iter().enumerate() {
        out.push_str(&format!(
            "{:>3}. {:<28} {:>5.2}/10{}  {}  ({})\n",
            i + 1,
            entry.crime,
            entry.final_score,
            if entry.refined { "" } else { "*" },
            entry.area,
            entry.recorded_at.format("%H:%M:%S")
        ));
        out.push_str(&format!("     {}\n", excerpt(&entry.narrative)));
    }
    out
}

fn excerpt(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let cut: String = text.chars().take(EXCERPT_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
