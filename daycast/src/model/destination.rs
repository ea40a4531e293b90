use std::path::Path;
use std::sync::Arc;

use daycast_core::model::choice::{
    CalculatorDims, CalculatorMode, ChoiceProbabilityCalculator, ChoiceProbabilityFactory,
};
use daycast_core::model::estimation::EstimationLog;
use daycast_core::model::sampling::{
    DestinationSampler, ParcelRef, SamplingSettings, SegmentZoneTable,
};

use crate::app::config::EstimationConfig;
use crate::app::AppError;
use crate::model::{ChoiceModel, LaneContext, ModelSetup};

/// parameter conventions of the generic destination model. model-family
/// coefficient files address terms by these indices.
mod parameter {
    /// sampling adjustment factor; its coefficient is constrained to one.
    pub const ADJUSTMENT: usize = 1;
    /// log of one plus the origin-zone weight toward the destination zone,
    /// standing in for impedance.
    pub const LOG_ATTRACTION: usize = 2;
    /// destination attraction size.
    pub const SIZE: usize = 51;
}

/// generic tour-destination choice model: samples destinations from the
/// frame, scores them with the sampling adjustment plus attraction terms,
/// and either simulates a choice or records an estimation row. a full model
/// family would replace the utility terms added in the sampling callback;
/// everything else is the shared machinery.
pub struct DestinationChoiceModel {
    frame: Arc<SegmentZoneTable>,
    sampling: SamplingSettings,
    sample_size: usize,
    estimation_mode: bool,
    calculator: ChoiceProbabilityCalculator,
    origin_zones: Vec<usize>,
}

impl DestinationChoiceModel {
    pub fn new(setup: &ModelSetup) -> Result<DestinationChoiceModel, AppError> {
        let origin_zones: Vec<usize> = setup.frame.iter().map(|zone| zone.id).collect();
        if origin_zones.is_empty() {
            return Err(AppError::Configuration(
                "sampling frame contains no zones".to_string(),
            ));
        }

        let mode = if setup.estimation.is_some() {
            CalculatorMode::Estimation
        } else {
            CalculatorMode::Application
        };

        // one slot per drawn alternative plus the pinned usual-location slot
        let dims = CalculatorDims::new(
            setup.sample_size + 1,
            1,
            1,
            setup.coefficients.len().saturating_sub(1),
        );
        let factory = ChoiceProbabilityFactory::new(setup.coefficients.clone(), mode, dims)?;
        let mut calculator = factory.calculator()?;

        if let Some(estimation) = setup.estimation.as_ref() {
            calculator.set_estimation_log(EstimationLog::create(Path::new(&estimation.data_file))?);
        }

        Ok(DestinationChoiceModel {
            frame: setup.frame.clone(),
            sampling: setup.sampling.clone(),
            sample_size: setup.sample_size,
            estimation_mode: setup.estimation.is_some(),
            calculator,
            origin_zones,
        })
    }

    /// deterministic synthetic origin for a decision maker: the smallest
    /// parcel of the zone the key hashes to. person/household data is
    /// outside this crate; model families plug real origins in here.
    fn origin_for(&self, key: u64) -> Result<ParcelRef, AppError> {
        let zone_index = self.origin_zones[key as usize % self.origin_zones.len()];
        let zone = self.frame.get(zone_index).ok_or_else(|| {
            AppError::Configuration(format!("zone {zone_index} missing from frame"))
        })?;
        let parcel = zone.ranked_sizes().last().ok_or_else(|| {
            AppError::Configuration(format!("zone {zone_index} holds no parcels"))
        })?;
        Ok(ParcelRef {
            id: parcel.id,
            zone: zone_index,
            sequence: parcel.sequence,
        })
    }

    /// the "survey-reported" choice used when recording estimation rows:
    /// the largest parcel of the origin zone.
    fn reported_choice(&self, origin: &ParcelRef) -> Result<ParcelRef, AppError> {
        let zone = self.frame.get(origin.zone).ok_or_else(|| {
            AppError::Configuration(format!("zone {} missing from frame", origin.zone))
        })?;
        let parcel = zone.ranked_sizes().next().ok_or_else(|| {
            AppError::Configuration(format!("zone {} holds no parcels", origin.zone))
        })?;
        Ok(ParcelRef {
            id: parcel.id,
            zone: origin.zone,
            sequence: parcel.sequence,
        })
    }
}

impl ChoiceModel for DestinationChoiceModel {
    fn run(&mut self, lane: &mut LaneContext, key: u64) -> Result<Option<u64>, AppError> {
        self.calculator.start_observation(key);

        let origin = self.origin_for(key)?;
        let chosen = if self.estimation_mode {
            Some(self.reported_choice(&origin)?)
        } else {
            None
        };

        let mut sampler = DestinationSampler::for_tour(
            &self.frame,
            &self.sampling,
            self.sample_size,
            self.estimation_mode,
            origin,
            None,
            None,
            chosen,
        )?;

        let seeds = lane.random.seed_values(self.sample_size);
        let mut sampled: Vec<(usize, u64)> = Vec::with_capacity(self.sample_size + 2);

        sampler.sample_tour_destinations(&mut self.calculator, &seeds, |calculator, item, _| {
            let Some(index) = item.alternative else {
                return Ok(());
            };
            sampled.push((index, item.parcel_id));

            let mut alternative = calculator.existing_alternative(index)?;
            if !alternative.is_available() {
                return Ok(());
            }
            alternative.add_utility_term(parameter::ADJUSTMENT, item.adjustment_factor)?;
            alternative
                .add_utility_term(parameter::LOG_ATTRACTION, (1.0 + item.weight_from_origin).ln())?;
            alternative.add_utility_term(parameter::SIZE, item.size)?;
            Ok(())
        })?;

        if self.estimation_mode {
            self.calculator.write_observation()?;
            return Ok(None);
        }

        let choice = self.calculator.simulate_choice(&mut lane.random);
        Ok(choice.and_then(|c| {
            sampled
                .iter()
                .find(|(index, _)| *index == c.index)
                .map(|(_, parcel_id)| *parcel_id)
        }))
    }

    fn observation_counts(&self) -> Option<(usize, usize)> {
        if self.estimation_mode {
            Some((
                self.calculator.accepted_observations(),
                self.calculator.rejected_observations(),
            ))
        } else {
            None
        }
    }

    fn finalize(self: Box<Self>, estimation: &EstimationConfig) -> Result<(), AppError> {
        self.calculator.finalize_estimation(
            Path::new(&estimation.data_file),
            Path::new(&estimation.control_file),
        )?;
        Ok(())
    }
}
