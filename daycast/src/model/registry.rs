use std::collections::HashMap;
use std::sync::Arc;

use daycast_core::model::coefficients::CoefficientSet;
use daycast_core::model::sampling::{SamplingSettings, SegmentZoneTable};
use daycast_core::util::random::RandomUtility;

use crate::app::config::EstimationConfig;
use crate::app::AppError;
use crate::model::DestinationChoiceModel;

/// everything a model constructor needs: shared immutable inputs plus the
/// run parameters.
pub struct ModelSetup {
    pub coefficients: Arc<CoefficientSet>,
    pub frame: Arc<SegmentZoneTable>,
    pub sampling: SamplingSettings,
    pub sample_size: usize,
    pub estimation: Option<EstimationConfig>,
}

/// per-lane mutable state passed explicitly into every model call. nothing
/// here is shared between lanes.
pub struct LaneContext {
    pub index: usize,
    pub random: RandomUtility,
}

impl LaneContext {
    pub fn new(index: usize, global_seed: u64) -> LaneContext {
        LaneContext {
            index,
            random: RandomUtility::new(global_seed.wrapping_add(index as u64)),
        }
    }
}

/// one runnable choice model. a lane owns its model instance (and through
/// it, the calculator/sampler family) for the whole run.
pub trait ChoiceModel: Send {
    /// processes one decision maker. returns the simulated destination id,
    /// or `None` when no alternative was available (or when the run is in
    /// estimation mode and only records data rows).
    fn run(&mut self, lane: &mut LaneContext, key: u64) -> Result<Option<u64>, AppError>;

    /// (accepted, rejected) observation counts, for estimation-mode runs.
    fn observation_counts(&self) -> Option<(usize, usize)> {
        None
    }

    /// emits estimation outputs. called exactly once, after every lane has
    /// joined.
    fn finalize(self: Box<Self>, _estimation: &EstimationConfig) -> Result<(), AppError> {
        Ok(())
    }
}

type ModelBuilder = Box<dyn Fn(&ModelSetup) -> Result<Box<dyn ChoiceModel>, AppError> + Send + Sync>;

/// explicit mapping from model identifiers to constructor closures, built
/// once at startup. adding a model means adding a registration here; there
/// is no runtime discovery.
pub struct ModelRegistry {
    builders: HashMap<String, ModelBuilder>,
}

impl ModelRegistry {
    pub fn new() -> ModelRegistry {
        ModelRegistry {
            builders: HashMap::new(),
        }
    }

    /// the registry with every built-in model registered.
    pub fn with_builtin_models() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register("destination", |setup| {
            Ok(Box::new(DestinationChoiceModel::new(setup)?))
        });
        registry
    }

    pub fn register<F>(&mut self, name: &str, builder: F)
    where
        F: Fn(&ModelSetup) -> Result<Box<dyn ChoiceModel>, AppError> + Send + Sync + 'static,
    {
        self.builders.insert(name.to_string(), Box::new(builder));
    }

    pub fn build(&self, name: &str, setup: &ModelSetup) -> Result<Box<dyn ChoiceModel>, AppError> {
        match self.builders.get(name) {
            Some(builder) => builder(setup),
            None => Err(AppError::UnknownModel(name.to_string())),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        ModelRegistry::with_builtin_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_knows_destination_model() {
        let registry = ModelRegistry::with_builtin_models();
        assert_eq!(registry.names(), vec!["destination"]);
    }

    #[test]
    fn test_unknown_model_is_an_error() {
        let registry = ModelRegistry::new();
        let setup = ModelSetup {
            coefficients: Arc::new(CoefficientSet::new("t", vec![], None)),
            frame: Arc::new(SegmentZoneTable::new(0)),
            sampling: SamplingSettings::default(),
            sample_size: 1,
            estimation: None,
        };
        assert!(matches!(
            registry.build("nope", &setup),
            Err(AppError::UnknownModel(name)) if name == "nope"
        ));
    }
}
