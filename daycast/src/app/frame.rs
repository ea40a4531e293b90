use std::collections::BTreeMap;
use std::path::Path;

use daycast_core::model::sampling::{SegmentZone, SegmentZoneTable};
use serde::Deserialize;

use crate::app::AppError;

#[derive(Debug, Deserialize)]
struct ParcelRow {
    parcel_id: u64,
    zone: usize,
    size: f64,
}

#[derive(Debug, Deserialize)]
struct WeightRow {
    origin: usize,
    destination: usize,
    weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub zones: usize,
    pub parcels: usize,
    pub weights: usize,
}

fn read_csv<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|source| AppError::Csv {
            path: path.display().to_string(),
            source,
        })?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let row: T = record.map_err(|source| AppError::Csv {
            path: path.display().to_string(),
            source,
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// builds the rank-sorted sampling frame from long-format parcel and
/// zone-weight tables and persists it as the binary artifact the sampler
/// loads. ranking happens exactly once, here; runs load the result
/// verbatim.
pub fn build_frame(
    parcels_path: &Path,
    weights_path: &Path,
    output_path: &Path,
) -> Result<FrameStats, AppError> {
    let parcels: Vec<ParcelRow> = read_csv(parcels_path)?;
    let weights: Vec<WeightRow> = read_csv(weights_path)?;

    if parcels.is_empty() {
        return Err(AppError::Configuration(format!(
            "{} contains no parcels",
            parcels_path.display()
        )));
    }

    // group parcels by zone, preserving input order as the zone-local
    // parcel sequence
    let mut parcels_by_zone: BTreeMap<usize, Vec<(u64, f64)>> = BTreeMap::new();
    for row in &parcels {
        parcels_by_zone
            .entry(row.zone)
            .or_default()
            .push((row.parcel_id, row.size));
    }

    let mut weights_by_zone: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
    for row in &weights {
        weights_by_zone
            .entry(row.origin)
            .or_default()
            .push((row.destination, row.weight));
    }

    let max_zone = parcels_by_zone
        .keys()
        .chain(weights_by_zone.keys())
        .chain(weights.iter().map(|w| &w.destination))
        .copied()
        .max()
        .unwrap_or(0);
    let zone_count = max_zone + 1;

    let mut table = SegmentZoneTable::new(zone_count);
    let mut stats = FrameStats::default();

    for (&zone_index, zone_parcels) in parcels_by_zone.iter() {
        let mut zone = SegmentZone::new(zone_index, zone_index as u64, zone_parcels.len(), zone_count);

        for (sequence, &(parcel_id, size)) in zone_parcels.iter().enumerate() {
            zone.set_size(sequence, parcel_id, size);
            zone.total_size += size;
            stats.parcels += 1;
        }

        if let Some(zone_weights) = weights_by_zone.get(&zone_index) {
            for &(destination, weight) in zone_weights.iter() {
                zone.set_weight(destination, weight);
                zone.total_weight += weight;
                stats.weights += 1;
            }
        }

        zone.rank_sizes();
        zone.rank_weights();
        table.insert(zone);
        stats.zones += 1;
    }

    table.save_to_path(output_path)?;
    log::info!(
        "frame written to {}: {} zones, {} parcels, {} weights",
        output_path.display(),
        stats.zones,
        stats.parcels,
        stats.weights,
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        std::fs::write(path, contents).expect("write csv");
    }

    #[test]
    fn test_build_frame_round_trips_through_the_sampler_format() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parcels = dir.path().join("parcels.csv");
        let weights = dir.path().join("weights.csv");
        let output = dir.path().join("frame.bin");

        write(
            &parcels,
            "parcel_id,zone,size\n11,0,30.0\n12,0,10.0\n21,1,6.0\n22,1,4.0\n",
        );
        write(
            &weights,
            "origin,destination,weight\n0,0,2.0\n0,1,8.0\n1,0,3.0\n",
        );

        let stats = build_frame(&parcels, &weights, &output).expect("build");
        assert_eq!(stats.zones, 2);
        assert_eq!(stats.parcels, 4);
        assert_eq!(stats.weights, 3);

        let table = SegmentZoneTable::load_from_path(&output).expect("load");
        let zone0 = table.get(0).expect("zone 0");
        assert_eq!(zone0.total_size, 40.0);
        assert_eq!(zone0.total_weight, 10.0);
        assert_eq!(zone0.weight(1), 8.0);

        let ranked: Vec<_> = zone0.ranked_sizes().collect();
        assert_eq!(ranked[0].id, 11);

        let zone1 = table.get(1).expect("zone 1");
        assert_eq!(zone1.total_size, 10.0);
        assert_eq!(zone1.weight(0), 3.0);
    }

    #[test]
    fn test_empty_parcels_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let parcels = dir.path().join("parcels.csv");
        let weights = dir.path().join("weights.csv");
        write(&parcels, "parcel_id,zone,size\n");
        write(&weights, "origin,destination,weight\n");

        let result = build_frame(&parcels, &weights, &dir.path().join("frame.bin"));
        assert!(matches!(result, Err(AppError::Configuration(_))));
    }
}
