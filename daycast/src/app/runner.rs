use std::path::Path;
use std::sync::{Arc, Mutex};

use daycast_core::model::coefficients::{CoefficientReader, TextCoefficientReader};
use daycast_core::model::sampling::SegmentZoneTable;
use kdam::{Bar, BarExt};
use rayon::prelude::*;

use crate::app::config::AppConfig;
use crate::app::AppError;
use crate::model::{ChoiceModel, LaneContext, ModelRegistry, ModelSetup};

/// tallies of one completed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub decision_makers: usize,
    pub lanes: usize,
    pub simulated_choices: usize,
    pub no_choice: usize,
    pub accepted_observations: usize,
    pub rejected_observations: usize,
}

struct LaneOutcome {
    model: Box<dyn ChoiceModel>,
    simulated_choices: usize,
    no_choice: usize,
}

/// splits decision makers into contiguous per-lane partitions. every lane
/// processes its partition sequentially with lane-owned state; partition
/// membership depends only on the key order and lane count, never on
/// thread scheduling.
fn partition(keys: &[u64], lanes: usize) -> Vec<Vec<u64>> {
    let chunk_size = keys.len().div_ceil(lanes).max(1);
    keys.chunks(chunk_size).map(|chunk| chunk.to_vec()).collect()
}

/// runs one configured model over the decision-maker population: loads the
/// coefficient set and sampling frame, fans the population out over worker
/// lanes, and (in estimation mode) emits the estimator files strictly after
/// every lane has joined.
pub fn run(config: &AppConfig, registry: &ModelRegistry) -> Result<RunSummary, AppError> {
    let coefficients = Arc::new(TextCoefficientReader.read(Path::new(&config.coefficients_file))?);
    let frame = Arc::new(SegmentZoneTable::load_from_path(Path::new(
        &config.frame_file,
    ))?);
    log::info!(
        "loaded '{}' with {} coefficients and a frame of {} zones",
        coefficients.title(),
        coefficients.iter().count(),
        frame.iter().count(),
    );

    // the estimation accumulator is single-writer; more than one lane would
    // interleave its observation rows
    let lanes = if config.is_estimation_mode() && config.lanes > 1 {
        log::warn!(
            "estimation mode runs single-lane; ignoring lanes = {}",
            config.lanes
        );
        1
    } else {
        config.lanes
    };

    let setup = ModelSetup {
        coefficients,
        frame,
        sampling: config.sampling.clone(),
        sample_size: config.sample_size,
        estimation: config.estimation.clone(),
    };

    let keys: Vec<u64> = (1..=config.decision_makers as u64).collect();
    let partitions = partition(&keys, lanes);
    log::info!(
        "processing {} decision makers across {} lane(s)",
        keys.len(),
        partitions.len()
    );

    let progress = Arc::new(Mutex::new(
        Bar::builder()
            .desc("decision makers")
            .total(keys.len())
            .build()
            .map_err(|e| AppError::Configuration(e.to_string()))?,
    ));

    let outcomes: Result<Vec<LaneOutcome>, AppError> = partitions
        .into_par_iter()
        .enumerate()
        .map(|(lane_index, chunk)| {
            let mut lane = LaneContext::new(lane_index, config.random_seed);
            let mut model = registry.build(&config.model, &setup)?;
            let mut simulated_choices = 0;
            let mut no_choice = 0;

            log::debug!("lane {lane_index} starts with {} decision makers", chunk.len());
            for &key in chunk.iter() {
                match model.run(&mut lane, key)? {
                    Some(_) => simulated_choices += 1,
                    None => no_choice += 1,
                }
                if let Ok(mut bar) = progress.lock() {
                    let _ = bar.update(1);
                }
            }

            Ok(LaneOutcome {
                model,
                simulated_choices,
                no_choice,
            })
        })
        .collect();
    let mut outcomes = outcomes?;
    eprintln!();

    let mut summary = RunSummary {
        decision_makers: keys.len(),
        lanes: outcomes.len(),
        ..RunSummary::default()
    };
    for outcome in outcomes.iter() {
        summary.simulated_choices += outcome.simulated_choices;
        summary.no_choice += outcome.no_choice;
        if let Some((accepted, rejected)) = outcome.model.observation_counts() {
            summary.accepted_observations += accepted;
            summary.rejected_observations += rejected;
        }
    }

    // all lanes have joined; estimation output is written once, here
    if let Some(estimation) = config.estimation.as_ref() {
        if let Some(outcome) = outcomes.pop() {
            outcome.model.finalize(estimation)?;
            log::info!(
                "estimation files written: {} ({} accepted, {} rejected observations)",
                estimation.control_file,
                summary.accepted_observations,
                summary.rejected_observations,
            );
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_contiguous_and_complete() {
        let keys: Vec<u64> = (1..=10).collect();
        let parts = partition(&keys, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], vec![1, 2, 3, 4]);
        assert_eq!(parts[1], vec![5, 6, 7, 8]);
        assert_eq!(parts[2], vec![9, 10]);

        let rejoined: Vec<u64> = parts.into_iter().flatten().collect();
        assert_eq!(rejoined, keys);
    }

    #[test]
    fn test_partition_handles_more_lanes_than_keys() {
        let keys: Vec<u64> = (1..=2).collect();
        let parts = partition(&keys, 8);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.concat(), keys);
    }

    #[test]
    fn test_partition_single_lane_keeps_order() {
        let keys: Vec<u64> = (1..=5).collect();
        let parts = partition(&keys, 1);
        assert_eq!(parts, vec![keys]);
    }
}
