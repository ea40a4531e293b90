use std::cmp::Reverse;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::model::sampling::SamplingError;

/// one (parcel id, attraction size) entry of a zone's sampling surface,
/// addressed by parcel sequence within the zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ParcelSize {
    pub id: u64,
    pub size: f64,
}

/// one entry of a zone's size table, visited in descending-size order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedSize {
    pub sequence: usize,
    pub id: u64,
    pub size: f64,
}

/// one entry of a zone's weight table, visited in descending-weight order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedWeight {
    pub zone: usize,
    pub weight: f64,
}

/// the persisted sampling surface for one zone of one segment: per-parcel
/// sizes, per-destination-zone weights, and descending rank-order index
/// arrays over both.
///
/// the rank order lets cumulative-sum draws terminate early; it is computed
/// once when the frame is built and loaded verbatim afterwards, so a saved
/// frame replays draws identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentZone {
    /// zone index within the frame.
    pub id: usize,
    /// external zone number, used as the symbolic destination at zone scale.
    pub key: u64,
    pub total_size: f64,
    pub total_weight: f64,
    parcel_sizes: Vec<ParcelSize>,
    ranked_size_indices: Vec<usize>,
    zone_weights: Vec<f64>,
    ranked_weight_indices: Vec<usize>,
}

impl SegmentZone {
    pub fn new(id: usize, key: u64, parcel_count: usize, zone_count: usize) -> SegmentZone {
        SegmentZone {
            id,
            key,
            total_size: 0.0,
            total_weight: 0.0,
            parcel_sizes: vec![ParcelSize { id: 0, size: 0.0 }; parcel_count],
            ranked_size_indices: Vec::new(),
            zone_weights: vec![0.0; zone_count],
            ranked_weight_indices: Vec::new(),
        }
    }

    pub fn set_size(&mut self, parcel_sequence: usize, parcel_id: u64, size: f64) {
        self.parcel_sizes[parcel_sequence] = ParcelSize {
            id: parcel_id,
            size,
        };
    }

    pub fn set_weight(&mut self, zone: usize, weight: f64) {
        self.zone_weights[zone] = weight;
    }

    /// size of the parcel at `parcel_sequence`; zero outside the table.
    pub fn size(&self, parcel_sequence: usize) -> f64 {
        self.parcel_sizes
            .get(parcel_sequence)
            .map(|p| p.size)
            .unwrap_or(0.0)
    }

    /// weight toward destination `zone`; zero outside the table.
    pub fn weight(&self, zone: usize) -> f64 {
        self.zone_weights.get(zone).copied().unwrap_or(0.0)
    }

    pub fn parcel_count(&self) -> usize {
        self.parcel_sizes.len()
    }

    /// computes the descending size rank order. stable: equal sizes keep
    /// their sequence order.
    pub fn rank_sizes(&mut self) {
        let mut indices: Vec<usize> = (0..self.parcel_sizes.len()).collect();
        indices.sort_by_key(|&i| Reverse(OrderedFloat(self.parcel_sizes[i].size)));
        self.ranked_size_indices = indices;
    }

    /// computes the descending weight rank order. stable: equal weights
    /// keep their zone order.
    pub fn rank_weights(&mut self) {
        let mut indices: Vec<usize> = (0..self.zone_weights.len()).collect();
        indices.sort_by_key(|&i| Reverse(OrderedFloat(self.zone_weights[i])));
        self.ranked_weight_indices = indices;
    }

    pub fn ranked_sizes(&self) -> impl Iterator<Item = RankedSize> + '_ {
        self.ranked_size_indices.iter().map(|&sequence| RankedSize {
            sequence,
            id: self.parcel_sizes[sequence].id,
            size: self.parcel_sizes[sequence].size,
        })
    }

    pub fn ranked_weights(&self) -> impl Iterator<Item = RankedWeight> + '_ {
        self.ranked_weight_indices.iter().map(|&zone| RankedWeight {
            zone,
            weight: self.zone_weights[zone],
        })
    }
}

/// index-addressed sparse table of [`SegmentZone`] records for one segment.
/// slot order is part of the persisted format: a load reproduces the save
/// exactly, absent slots included.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SegmentZoneTable {
    zones: Vec<Option<SegmentZone>>,
}

impl SegmentZoneTable {
    pub fn new(zone_count: usize) -> SegmentZoneTable {
        SegmentZoneTable {
            zones: vec![None; zone_count],
        }
    }

    pub fn insert(&mut self, zone: SegmentZone) {
        let index = zone.id;
        if index >= self.zones.len() {
            self.zones.resize_with(index + 1, || None);
        }
        self.zones[index] = Some(zone);
    }

    pub fn get(&self, index: usize) -> Option<&SegmentZone> {
        self.zones.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.iter().all(|slot| slot.is_none())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentZone> {
        self.zones.iter().flatten()
    }

    pub fn save<W: Write>(&self, writer: W) -> Result<(), SamplingError> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load<R: Read>(reader: R) -> Result<SegmentZoneTable, SamplingError> {
        let table = bincode::deserialize_from(reader)?;
        Ok(table)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), SamplingError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.save(BufWriter::new(File::create(path)?))
    }

    pub fn load_from_path(path: &Path) -> Result<SegmentZoneTable, SamplingError> {
        SegmentZoneTable::load(BufReader::new(File::open(path)?))
    }
}
