#[derive(thiserror::Error, Debug)]
pub enum ChoiceModelError {
    #[error("a usable coefficient set is required to build a choice probability calculator")]
    MissingCoefficients,
    #[error("value is NaN for {owner}, parameter {parameter}")]
    ValueIsNaN { owner: String, parameter: usize },
    #[error("value is Infinity for {owner}, parameter {parameter}")]
    ValueIsInfinity { owner: String, parameter: usize },
    #[error("alternative index {index} out of range, calculator holds {total} alternatives")]
    AlternativeOutOfRange { index: usize, total: usize },
    #[error("nest index {index} out of range, calculator holds {total} nests")]
    NestOutOfRange { index: usize, total: usize },
    #[error("nesting level {level} out of range, calculator holds {total} levels")]
    LevelOutOfRange { level: usize, total: usize },
    #[error("{owner} was never registered for the current observation")]
    SlotNotRegistered { owner: String },
}
