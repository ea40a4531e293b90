use serde::{Deserialize, Serialize};

/// granularity of the destination draw. zone-scale sampling stops after the
/// zone stage and returns the zone's symbolic key; microzone-scale draws
/// parcels without origin/exclusion bookkeeping; parcel-scale is the full
/// two-stage draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DestinationScale {
    #[default]
    Parcel,
    MicroZone,
    Zone,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SamplingSettings {
    #[serde(default)]
    pub destination_scale: DestinationScale,
    /// candidates below this size always return "no draw".
    #[serde(default)]
    pub min_parcel_size: f64,
}
