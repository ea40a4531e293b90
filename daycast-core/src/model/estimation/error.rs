#[derive(thiserror::Error, Debug)]
pub enum EstimationError {
    #[error("failure writing estimation files: {0}")]
    Io(#[from] std::io::Error),
    #[error("calculator is not in estimation mode")]
    NotInEstimationMode,
    #[error("no chosen-alternative column was established before finalizing estimation files")]
    MissingChosenColumn,
    #[error("malformed row {line} in the observation log: {message}")]
    MalformedRow { line: usize, message: String },
}
