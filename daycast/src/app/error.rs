use daycast_core::model::choice::ChoiceModelError;
use daycast_core::model::coefficients::CoefficientError;
use daycast_core::model::estimation::EstimationError;
use daycast_core::model::sampling::SamplingError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("unknown choice model '{0}'")]
    UnknownModel(String),
    #[error(transparent)]
    Coefficient(#[from] CoefficientError),
    #[error(transparent)]
    ChoiceModel(#[from] ChoiceModelError),
    #[error(transparent)]
    Sampling(#[from] SamplingError),
    #[error(transparent)]
    Estimation(#[from] EstimationError),
    #[error("failure reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failure reading csv {path}: {source}")]
    Csv { path: String, source: csv::Error },
}
