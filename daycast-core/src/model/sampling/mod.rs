mod destination_sampler;
mod error;
mod sample_item;
mod segment_zone;
mod settings;

pub use destination_sampler::{DestinationSampler, ParcelRef};
pub use error::SamplingError;
pub use sample_item::{AlternativeKind, StopSampleItem, TourSampleItem};
pub use segment_zone::{ParcelSize, RankedSize, RankedWeight, SegmentZone, SegmentZoneTable};
pub use settings::{DestinationScale, SamplingSettings};
