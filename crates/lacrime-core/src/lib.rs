pub mod config;
mod error;
pub mod label;
pub mod mocode;
pub mod profile;
pub mod text;

pub use config::Settings;
pub use error::CoreError;
pub use label::{SeverityCategory, proxy_label};
pub use mocode::MocodeTable;
pub use profile::{AgeGroup, CrimeProfile, Descent, Season, Sex, TimeOfDay, compose_narrative};
pub use text::normalize;
