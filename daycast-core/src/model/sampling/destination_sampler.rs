use indexmap::IndexMap;

use crate::model::choice::{ChoiceModelError, ChoiceProbabilityCalculator};
use crate::model::sampling::{
    AlternativeKind, DestinationScale, SamplingError, SamplingSettings, SegmentZone,
    SegmentZoneTable, StopSampleItem, TourSampleItem,
};
use crate::util::numeric::EPSILON;
use crate::util::random::{RandomUniform01, UniformSource};

/// every this many consecutive null draws for one sample slot, dump a
/// diagnostic of the offending zone.
const NULL_DRAW_WARN_INTERVAL: u64 = 2_000_000;
/// hard ceiling on consecutive null draws; a pathological all-zero zone
/// aborts the run instead of spinning forever.
const NULL_DRAW_ABORT: u64 = 20_000_000;

/// a parcel as the sampler needs to see it: its id, the frame index of its
/// zone, and its sequence within that zone's size table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParcelRef {
    pub id: u64,
    pub zone: usize,
    pub sequence: usize,
}

#[derive(Debug, Clone)]
struct RawDraw {
    zone: usize,
    parcel_id: u64,
    sequence: usize,
    excluded_size: f64,
}

/// two-stage Monte-Carlo destination sampler over a rank-sorted sampling
/// frame. draws up to N alternatives with replacement (zone stage, then
/// parcel stage), collapses duplicates into (alternative, multiplicity)
/// pairs, and attaches the importance-sampling adjustment factor that keeps
/// downstream choice probabilities asymptotically unbiased relative to full
/// enumeration.
pub struct DestinationSampler<'a> {
    frame: &'a SegmentZoneTable,
    settings: &'a SamplingSettings,
    sample_size: usize,
    estimation_mode: bool,
    origin: Option<ParcelRef>,
    excluded: Option<ParcelRef>,
    usual: Option<ParcelRef>,
    chosen: Option<ParcelRef>,
    tour_origin: Option<ParcelRef>,
    trip_origin: Option<ParcelRef>,
    next_alternative: usize,
}

impl<'a> DestinationSampler<'a> {
    /// sampler for tour-destination models drawing from a single origin,
    /// with optional exclusion bookkeeping and usual-location injection.
    /// estimation mode requires the survey-reported chosen parcel.
    pub fn for_tour(
        frame: &'a SegmentZoneTable,
        settings: &'a SamplingSettings,
        sample_size: usize,
        estimation_mode: bool,
        origin: ParcelRef,
        excluded: Option<ParcelRef>,
        usual: Option<ParcelRef>,
        chosen: Option<ParcelRef>,
    ) -> Result<DestinationSampler<'a>, SamplingError> {
        if estimation_mode && chosen.is_none() {
            return Err(SamplingError::ChosenParcelNotSet);
        }
        Ok(DestinationSampler {
            frame,
            settings,
            sample_size,
            estimation_mode,
            origin: Some(origin),
            excluded,
            usual,
            chosen,
            tour_origin: None,
            trip_origin: None,
            next_alternative: 0,
        })
    }

    /// sampler for usual-location models. these may legitimately lack a
    /// chosen parcel in estimation mode (the reported location can be the
    /// residence, which is not a sampled destination).
    pub fn for_usual_location(
        frame: &'a SegmentZoneTable,
        settings: &'a SamplingSettings,
        sample_size: usize,
        estimation_mode: bool,
        origin: ParcelRef,
        chosen: Option<ParcelRef>,
    ) -> DestinationSampler<'a> {
        DestinationSampler {
            frame,
            settings,
            sample_size,
            estimation_mode,
            origin: Some(origin),
            excluded: None,
            usual: None,
            chosen,
            tour_origin: None,
            trip_origin: None,
            next_alternative: 0,
        }
    }

    /// sampler for intermediate-stop models, drawing half the sample from
    /// the tour-origin perspective and half from the trip-origin
    /// perspective.
    pub fn for_intermediate_stops(
        frame: &'a SegmentZoneTable,
        settings: &'a SamplingSettings,
        sample_size: usize,
        estimation_mode: bool,
        tour_origin: ParcelRef,
        trip_origin: ParcelRef,
        chosen: Option<ParcelRef>,
    ) -> Result<DestinationSampler<'a>, SamplingError> {
        if estimation_mode && chosen.is_none() {
            return Err(SamplingError::ChosenParcelNotSet);
        }
        Ok(DestinationSampler {
            frame,
            settings,
            sample_size,
            estimation_mode,
            origin: None,
            excluded: None,
            usual: None,
            chosen,
            tour_origin: Some(tour_origin),
            trip_origin: Some(trip_origin),
            next_alternative: 0,
        })
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn zone(&self, index: usize) -> Result<&'a SegmentZone, SamplingError> {
        self.frame
            .get(index)
            .ok_or(SamplingError::MissingZone(index))
    }

    /// draws destinations, registers each deduplicated alternative on the
    /// calculator, computes adjustment factors, and hands every
    /// (item, multiplicity) pair to `set_utilities`. returns the number of
    /// distinct alternatives in the sample.
    pub fn sample_tour_destinations<F>(
        &mut self,
        calculator: &mut ChoiceProbabilityCalculator,
        seeds: &[i32],
        mut set_utilities: F,
    ) -> Result<usize, SamplingError>
    where
        F: FnMut(
            &mut ChoiceProbabilityCalculator,
            &TourSampleItem,
            usize,
        ) -> Result<(), ChoiceModelError>,
    {
        let sample = self.tour_sample(Some(&mut *calculator), seeds)?;
        for (item, multiplicity) in sample.values() {
            set_utilities(&mut *calculator, item, *multiplicity)?;
        }
        Ok(sample.len())
    }

    /// draws and deduplicates a tour-destination sample without touching a
    /// calculator, for callers that consume the sample directly (aggregate
    /// logsum evaluation and the like).
    pub fn collect_tour_destinations(
        &mut self,
        seeds: &[i32],
    ) -> Result<IndexMap<u64, (TourSampleItem, usize)>, SamplingError> {
        self.tour_sample(None, seeds)
    }

    fn tour_sample(
        &mut self,
        mut calculator: Option<&mut ChoiceProbabilityCalculator>,
        seeds: &[i32],
    ) -> Result<IndexMap<u64, (TourSampleItem, usize)>, SamplingError> {
        let origin = self.origin.clone().ok_or(SamplingError::MissingOriginParcel)?;
        if seeds.len() < self.sample_size {
            return Err(SamplingError::NotEnoughSeeds {
                expected: self.sample_size,
                found: seeds.len(),
            });
        }

        let excluded = self.excluded.clone();
        let mut raws = Vec::with_capacity(self.sample_size);
        for &seed in &seeds[..self.sample_size] {
            raws.push(self.draw_with_retries(seed, &origin, excluded.as_ref())?);
        }

        let mut sample: IndexMap<u64, (TourSampleItem, usize)> =
            IndexMap::with_capacity(self.sample_size + 2);

        for raw in raws {
            let is_chosen = self.chosen.as_ref().is_some_and(|c| c.id == raw.parcel_id);
            self.insert_tour_item(
                calculator.as_deref_mut(),
                &mut sample,
                &origin,
                raw,
                is_chosen,
                AlternativeKind::Drawn,
            )?;
        }

        // force the survey-reported chosen parcel (and the usual location,
        // when distinct) into the estimation sample so the data row matches
        // reported behavior even when Monte-Carlo sampling missed it
        if self.estimation_mode && self.chosen.is_some() {
            if let Some(chosen) = self.chosen.clone() {
                let usual_is_chosen = self
                    .usual
                    .as_ref()
                    .is_some_and(|usual| usual.id == chosen.id);
                let kind = if usual_is_chosen {
                    AlternativeKind::Usual
                } else {
                    AlternativeKind::Chosen
                };
                let raw = RawDraw {
                    zone: chosen.zone,
                    parcel_id: chosen.id,
                    sequence: chosen.sequence,
                    excluded_size: 0.0,
                };
                self.insert_tour_item(
                    calculator.as_deref_mut(),
                    &mut sample,
                    &origin,
                    raw,
                    true,
                    kind,
                )?;
            }
            if let Some(usual) = self.usual.clone() {
                let distinct = self.chosen.as_ref().is_some_and(|c| c.id != usual.id);
                if distinct {
                    let raw = RawDraw {
                        zone: usual.zone,
                        parcel_id: usual.id,
                        sequence: usual.sequence,
                        excluded_size: 0.0,
                    };
                    self.insert_tour_item(
                        calculator.as_deref_mut(),
                        &mut sample,
                        &origin,
                        raw,
                        false,
                        AlternativeKind::Usual,
                    )?;
                }
            }
        } else if let Some(usual) = self.usual.clone() {
            let raw = RawDraw {
                zone: usual.zone,
                parcel_id: usual.id,
                sequence: usual.sequence,
                excluded_size: 0.0,
            };
            self.insert_tour_item(
                calculator.as_deref_mut(),
                &mut sample,
                &origin,
                raw,
                false,
                AlternativeKind::Usual,
            )?;
        }

        let draws = self.sample_size as f64;
        for (item, multiplicity) in sample.values_mut() {
            if item.probability >= EPSILON {
                item.adjustment_factor =
                    -(draws * item.probability / *multiplicity as f64).ln();
            }
        }

        Ok(sample)
    }

    /// draws destinations for an intermediate stop: two half-size samples,
    /// one from each origin perspective, blended in the adjustment factor.
    pub fn sample_intermediate_stop_destinations<F>(
        &mut self,
        calculator: &mut ChoiceProbabilityCalculator,
        seeds: &[i32],
        mut set_utilities: F,
    ) -> Result<usize, SamplingError>
    where
        F: FnMut(
            &mut ChoiceProbabilityCalculator,
            &StopSampleItem,
            usize,
        ) -> Result<(), ChoiceModelError>,
    {
        let tour_origin = self
            .tour_origin
            .clone()
            .ok_or(SamplingError::MissingOriginParcel)?;
        let trip_origin = self
            .trip_origin
            .clone()
            .ok_or(SamplingError::MissingOriginParcel)?;
        if seeds.len() < self.sample_size {
            return Err(SamplingError::NotEnoughSeeds {
                expected: self.sample_size,
                found: seeds.len(),
            });
        }

        let half = self.sample_size / 2;
        let rest = self.sample_size - half;

        let mut raws = Vec::with_capacity(self.sample_size);
        for (i, &seed) in seeds[..self.sample_size].iter().enumerate() {
            let raw = if i < half {
                self.draw_with_retries(seed, &tour_origin, Some(&trip_origin))?
            } else {
                self.draw_with_retries(seed, &trip_origin, Some(&tour_origin))?
            };
            raws.push(raw);
        }

        let mut sample: IndexMap<u64, (StopSampleItem, usize)> =
            IndexMap::with_capacity(self.sample_size + 1);

        {
            let mut calculator = Some(&mut *calculator);
            for raw in raws {
                let is_chosen = self.chosen.as_ref().is_some_and(|c| c.id == raw.parcel_id);
                self.insert_stop_item(
                    calculator.as_deref_mut(),
                    &mut sample,
                    &tour_origin,
                    &trip_origin,
                    raw,
                    is_chosen,
                    AlternativeKind::Drawn,
                )?;
            }

            if self.estimation_mode {
                if let Some(chosen) = self.chosen.clone() {
                    let raw = RawDraw {
                        zone: chosen.zone,
                        parcel_id: chosen.id,
                        sequence: chosen.sequence,
                        excluded_size: 0.0,
                    };
                    self.insert_stop_item(
                        calculator.as_deref_mut(),
                        &mut sample,
                        &tour_origin,
                        &trip_origin,
                        raw,
                        true,
                        AlternativeKind::Chosen,
                    )?;
                }
            }
        }

        for (item, multiplicity) in sample.values_mut() {
            // floor both probabilities when neither origin could have drawn
            // this parcel, so the blended log stays finite
            if item.probability1 < EPSILON && item.probability2 < EPSILON {
                item.probability1 = 2.0 * EPSILON;
                item.probability2 = 2.0 * EPSILON;
            }
            item.adjustment_factor = -((half as f64 * item.probability1
                + rest as f64 * item.probability2)
                / *multiplicity as f64)
                .ln();
        }

        for (item, multiplicity) in sample.values() {
            set_utilities(&mut *calculator, item, *multiplicity)?;
        }

        Ok(sample.len())
    }

    fn draw_with_retries(
        &self,
        seed: i32,
        origin: &ParcelRef,
        excluded: Option<&ParcelRef>,
    ) -> Result<RawDraw, SamplingError> {
        let mut random = RandomUniform01::new(seed);
        let mut attempts: u64 = 0;

        loop {
            if let Some(draw) = self.draw_destination(&mut random, origin, excluded)? {
                return Ok(draw);
            }
            attempts += 1;
            if attempts % NULL_DRAW_WARN_INTERVAL == 0 {
                let origin_zone = self.zone(origin.zone)?;
                log::warn!(
                    "{attempts} consecutive null draws from zone {} (key {}, total weight {}, total size {}, min parcel size {})",
                    origin_zone.id,
                    origin_zone.key,
                    origin_zone.total_weight,
                    origin_zone.total_size,
                    self.settings.min_parcel_size,
                );
            }
            if attempts >= NULL_DRAW_ABORT {
                return Err(SamplingError::DrawExhausted {
                    origin_zone: origin.zone,
                    attempts,
                });
            }
        }
    }

    /// one two-stage draw. `None` means "no draw": the parcel stage landed
    /// on an excluded or sub-floor candidate and the caller should retry.
    fn draw_destination(
        &self,
        random: &mut RandomUniform01,
        origin: &ParcelRef,
        excluded: Option<&ParcelRef>,
    ) -> Result<Option<RawDraw>, SamplingError> {
        let origin_zone = self.zone(origin.zone)?;

        let mut destination: Option<&SegmentZone> = None;
        let zone_draw = random.uniform01() * origin_zone.total_weight;
        if zone_draw > 0.001 {
            let mut total = 0.0;
            for entry in origin_zone.ranked_weights() {
                total += entry.weight;
                if total <= zone_draw {
                    continue;
                }
                destination = Some(self.zone(entry.zone)?);
                break;
            }
        }
        // near-zero remainder falls back to the origin's own zone
        let destination = destination.unwrap_or(origin_zone);

        if self.settings.destination_scale == DestinationScale::Zone {
            return Ok(Some(RawDraw {
                zone: destination.id,
                parcel_id: destination.key,
                sequence: 0,
                excluded_size: 0.0,
            }));
        }

        let mut excluded_size = 0.0;
        if self.settings.destination_scale == DestinationScale::Parcel {
            if destination.id == origin.zone {
                excluded_size += origin_zone.size(origin.sequence);
            }
            if let Some(excluded) = excluded {
                if destination.id == excluded.zone {
                    excluded_size += self.zone(excluded.zone)?.size(excluded.sequence);
                }
            }
        }

        let parcel_draw = random.uniform01() * (destination.total_size - excluded_size);
        if parcel_draw > 0.001 {
            let mut total = 0.0;
            for entry in destination.ranked_sizes() {
                let counted = self.settings.destination_scale == DestinationScale::MicroZone
                    || (origin.id != entry.id
                        && excluded.is_none_or(|e| e.id != entry.id));
                if counted {
                    total += entry.size;
                }
                if total <= parcel_draw {
                    continue;
                }
                // a drawn parcel below the size floor is not a valid draw
                if entry.size >= self.settings.min_parcel_size {
                    return Ok(Some(RawDraw {
                        zone: destination.id,
                        parcel_id: entry.id,
                        sequence: entry.sequence,
                        excluded_size,
                    }));
                }
                break;
            }
        }

        Ok(None)
    }

    fn assign_alternative_index<T>(
        &mut self,
        sample: &mut IndexMap<u64, (T, usize)>,
        kind: AlternativeKind,
    ) -> usize {
        match kind {
            AlternativeKind::Drawn => {
                let index = self.next_alternative;
                self.next_alternative += 1;
                index
            }
            AlternativeKind::Chosen => {
                if sample.len() == self.sample_size {
                    evict_lowest_multiplicity(sample);
                }
                sample.len()
            }
            AlternativeKind::Usual => self.sample_size,
        }
    }

    fn insert_tour_item(
        &mut self,
        mut calculator: Option<&mut ChoiceProbabilityCalculator>,
        sample: &mut IndexMap<u64, (TourSampleItem, usize)>,
        origin: &ParcelRef,
        raw: RawDraw,
        is_chosen: bool,
        kind: AlternativeKind,
    ) -> Result<(), SamplingError> {
        if let Some((_, multiplicity)) = sample.get_mut(&raw.parcel_id) {
            *multiplicity += 1;
            return Ok(());
        }

        let alternative_index = self.assign_alternative_index(sample, kind);

        let origin_zone = self.zone(origin.zone)?;
        let destination_zone = self.zone(raw.zone)?;

        let mut item = TourSampleItem {
            parcel_id: raw.parcel_id,
            sequence: raw.sequence,
            zone: raw.zone,
            size: destination_zone.size(raw.sequence),
            total_size: destination_zone.total_size,
            excluded_size: raw.excluded_size,
            weight_from_origin: origin_zone.weight(destination_zone.id),
            total_weight_from_origin: origin_zone.total_weight,
            probability: 0.0,
            adjustment_factor: 0.0,
            available: true,
            is_chosen,
            alternative: None,
        };

        if let Some(calc) = calculator.as_deref_mut() {
            calc.alternative(alternative_index, true, is_chosen)?;
            item.alternative = Some(alternative_index);
        }

        self.set_tour_probability(&mut item, calculator)?;

        sample.insert(raw.parcel_id, (item, 1));
        Ok(())
    }

    fn set_tour_probability(
        &self,
        item: &mut TourSampleItem,
        mut calculator: Option<&mut ChoiceProbabilityCalculator>,
    ) -> Result<(), SamplingError> {
        let zone_probability = item.weight_from_origin / item.total_weight_from_origin.max(EPSILON);

        // the estimation-mode chosen alternative carries a definitive
        // availability flag; everything else is simply available
        let set_availability = self.estimation_mode
            && self.chosen.as_ref().is_some_and(|c| c.id == item.parcel_id);

        if self.settings.destination_scale == DestinationScale::Zone {
            item.probability = zone_probability;
            if set_availability {
                item.available = item.probability > 0.0
                    && item.weight_from_origin > self.settings.min_parcel_size;
                if let (Some(calc), Some(index)) = (calculator.as_deref_mut(), item.alternative) {
                    calc.existing_alternative(index)?.set_available(item.available)?;
                }
            }
            return Ok(());
        }

        // the chosen alternative's own mass is never excluded from its
        // inclusion probability
        let excluded_size = if set_availability { 0.0 } else { item.excluded_size };
        let parcel_probability = item.size / (item.total_size - excluded_size).max(EPSILON);

        item.probability = zone_probability * parcel_probability;

        if set_availability {
            item.available =
                item.probability > 0.0 && item.size >= self.settings.min_parcel_size;
            if let (Some(calc), Some(index)) = (calculator.as_deref_mut(), item.alternative) {
                calc.existing_alternative(index)?.set_available(item.available)?;
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_stop_item(
        &mut self,
        mut calculator: Option<&mut ChoiceProbabilityCalculator>,
        sample: &mut IndexMap<u64, (StopSampleItem, usize)>,
        tour_origin: &ParcelRef,
        trip_origin: &ParcelRef,
        raw: RawDraw,
        is_chosen: bool,
        kind: AlternativeKind,
    ) -> Result<(), SamplingError> {
        if let Some((_, multiplicity)) = sample.get_mut(&raw.parcel_id) {
            *multiplicity += 1;
            return Ok(());
        }

        let alternative_index = self.assign_alternative_index(sample, kind);

        let tour_zone = self.zone(tour_origin.zone)?;
        let trip_zone = self.zone(trip_origin.zone)?;
        let destination_zone = self.zone(raw.zone)?;

        let mut item = StopSampleItem {
            parcel_id: raw.parcel_id,
            sequence: raw.sequence,
            zone: raw.zone,
            size: destination_zone.size(raw.sequence),
            total_size: destination_zone.total_size,
            excluded_size: raw.excluded_size,
            tour_weight_from_origin: tour_zone.weight(destination_zone.id),
            total_tour_weight_from_origin: tour_zone.total_weight,
            trip_weight_from_origin: trip_zone.weight(destination_zone.id),
            total_trip_weight_from_origin: trip_zone.total_weight,
            probability1: 0.0,
            probability2: 0.0,
            adjustment_factor: 0.0,
            available: true,
            is_chosen,
            alternative: None,
        };

        if let Some(calc) = calculator.as_deref_mut() {
            calc.alternative(alternative_index, true, is_chosen)?;
            item.alternative = Some(alternative_index);
        }

        self.set_stop_probability(&mut item, calculator)?;

        sample.insert(raw.parcel_id, (item, 1));
        Ok(())
    }

    fn set_stop_probability(
        &self,
        item: &mut StopSampleItem,
        mut calculator: Option<&mut ChoiceProbabilityCalculator>,
    ) -> Result<(), SamplingError> {
        let zone_probability1 =
            item.tour_weight_from_origin / item.total_tour_weight_from_origin.max(EPSILON);
        let zone_probability2 =
            item.trip_weight_from_origin / item.total_trip_weight_from_origin.max(EPSILON);

        let set_availability = self.estimation_mode
            && self.chosen.as_ref().is_some_and(|c| c.id == item.parcel_id);

        if self.settings.destination_scale == DestinationScale::Zone {
            item.probability1 = zone_probability1;
            item.probability2 = zone_probability2;
            if set_availability {
                item.available = (item.probability1 > 0.0 || item.probability2 > 0.0)
                    && item.tour_weight_from_origin > self.settings.min_parcel_size;
                if let (Some(calc), Some(index)) = (calculator.as_deref_mut(), item.alternative) {
                    calc.existing_alternative(index)?.set_available(item.available)?;
                }
            }
            return Ok(());
        }

        let excluded_size = if set_availability { 0.0 } else { item.excluded_size };
        let parcel_probability = item.size / (item.total_size - excluded_size).max(EPSILON);

        item.probability1 = zone_probability1 * parcel_probability;
        item.probability2 = zone_probability2 * parcel_probability;

        if set_availability {
            item.available = (item.probability1 > 0.0 || item.probability2 > 0.0)
                && item.size >= self.settings.min_parcel_size;
            if let (Some(calc), Some(index)) = (calculator.as_deref_mut(), item.alternative) {
                calc.existing_alternative(index)?.set_available(item.available)?;
            }
        }

        Ok(())
    }
}

/// removes the lowest-multiplicity entry to make room for a forced chosen
/// alternative; ties break toward the most recently inserted entry.
fn evict_lowest_multiplicity<T>(sample: &mut IndexMap<u64, (T, usize)>) {
    let mut victim: Option<usize> = None;
    let mut lowest = usize::MAX;
    for (index, (_, (_, multiplicity))) in sample.iter().enumerate() {
        if *multiplicity <= lowest {
            lowest = *multiplicity;
            victim = Some(index);
        }
    }
    if let Some(index) = victim {
        sample.shift_remove_index(index);
    }
}
