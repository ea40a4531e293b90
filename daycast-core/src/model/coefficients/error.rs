#[derive(thiserror::Error, Debug)]
pub enum CoefficientError {
    #[error("coefficient file not found: {0}")]
    FileNotFound(String),
    #[error("failure reading coefficient file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed coefficient row at line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("coefficient file {0} declares no coefficients")]
    Empty(String),
}
