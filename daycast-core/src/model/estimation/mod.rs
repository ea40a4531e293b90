pub(crate) mod observation;

mod error;
mod files;

pub use error::EstimationError;
pub use files::EstimationLog;

pub(crate) use files::{compact_data_file, write_control_file};
