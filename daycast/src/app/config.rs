use std::path::Path;

use daycast_core::model::sampling::SamplingSettings;
use serde::{Deserialize, Serialize};

use crate::app::AppError;

fn default_lanes() -> usize {
    1
}

fn default_seed() -> u64 {
    1
}

/// estimation-mode output targets. presence of this section switches the
/// run into estimation mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimationConfig {
    /// positional data file consumed by the external estimator.
    pub data_file: String,
    /// control file describing coefficients, nesting and equations.
    pub control_file: String,
}

/// one simulation or estimation run, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// registry key of the choice model to run.
    pub model: String,
    pub coefficients_file: String,
    /// binary sampling-frame artifact produced by `build-frame`.
    pub frame_file: String,
    pub decision_makers: usize,
    /// destination alternatives drawn per decision maker.
    pub sample_size: usize,
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    #[serde(default = "default_seed")]
    pub random_seed: u64,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub estimation: Option<EstimationConfig>,
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<AppConfig, AppError> {
        let contents = std::fs::read_to_string(path).map_err(|source| AppError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| AppError::Configuration(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.decision_makers == 0 {
            return Err(AppError::Configuration(
                "decision_makers must be positive".to_string(),
            ));
        }
        if self.sample_size == 0 {
            return Err(AppError::Configuration(
                "sample_size must be positive".to_string(),
            ));
        }
        if self.lanes == 0 {
            return Err(AppError::Configuration("lanes must be positive".to_string()));
        }
        Ok(())
    }

    pub fn is_estimation_mode(&self) -> bool {
        self.estimation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
model = "destination"
coefficients_file = "work.f12"
frame_file = "frame.bin"
decision_makers = 100
sample_size = 20
"#,
        )
        .expect("parse");

        assert_eq!(config.lanes, 1);
        assert_eq!(config.random_seed, 1);
        assert!(!config.is_estimation_mode());
        config.validate().expect("valid");
    }

    #[test]
    fn test_estimation_section_switches_mode() {
        let config: AppConfig = toml::from_str(
            r#"
model = "destination"
coefficients_file = "work.f12"
frame_file = "frame.bin"
decision_makers = 10
sample_size = 5
lanes = 4

[sampling]
destination_scale = "parcel"
min_parcel_size = 100.0

[estimation]
data_file = "work.dat"
control_file = "work.alo"
"#,
        )
        .expect("parse");

        assert!(config.is_estimation_mode());
        assert_eq!(config.sampling.min_parcel_size, 100.0);
    }

    #[test]
    fn test_zero_counts_are_rejected() {
        let mut config: AppConfig = toml::from_str(
            r#"
model = "destination"
coefficients_file = "work.f12"
frame_file = "frame.bin"
decision_makers = 10
sample_size = 5
"#,
        )
        .expect("parse");

        config.decision_makers = 0;
        assert!(config.validate().is_err());
    }
}
