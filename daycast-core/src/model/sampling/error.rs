use crate::model::choice::ChoiceModelError;

#[derive(thiserror::Error, Debug)]
pub enum SamplingError {
    #[error("a chosen parcel must be provided when sampling in estimation mode")]
    ChosenParcelNotSet,
    #[error("sampler was built without the origin parcel this draw variant requires")]
    MissingOriginParcel,
    #[error("segment zone {0} is not present in the sampling frame")]
    MissingZone(usize),
    #[error("no destination drawn for origin zone {origin_zone} after {attempts} attempts")]
    DrawExhausted { origin_zone: usize, attempts: u64 },
    #[error("expected at least {expected} sampling seeds, found {found}")]
    NotEnoughSeeds { expected: usize, found: usize },
    #[error(transparent)]
    ChoiceModel(#[from] ChoiceModelError),
    #[error("failure accessing sampling frame file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failure encoding or decoding sampling frame: {0}")]
    Persistence(#[from] bincode::Error),
}
