use std::sync::Arc;

use crate::model::choice::{
    CalculatorDims, CalculatorMode, ChoiceModelError, ChoiceProbabilityCalculator,
};
use crate::model::coefficients::CoefficientSet;

/// binds one model's coefficient set, capacities and mode, and builds
/// calculators from them. each worker lane owns the calculator it gets;
/// sub-models needing logsum evaluation request fresh nested calculators.
pub struct ChoiceProbabilityFactory {
    coefficients: Arc<CoefficientSet>,
    dims: CalculatorDims,
    mode: CalculatorMode,
}

impl ChoiceProbabilityFactory {
    pub fn new(
        coefficients: Arc<CoefficientSet>,
        mode: CalculatorMode,
        dims: CalculatorDims,
    ) -> Result<ChoiceProbabilityFactory, ChoiceModelError> {
        if coefficients.is_empty() {
            return Err(ChoiceModelError::MissingCoefficients);
        }
        Ok(ChoiceProbabilityFactory {
            coefficients,
            dims,
            mode,
        })
    }

    pub fn mode(&self) -> CalculatorMode {
        self.mode
    }

    pub fn coefficients(&self) -> &Arc<CoefficientSet> {
        &self.coefficients
    }

    pub fn dims(&self) -> &CalculatorDims {
        &self.dims
    }

    /// builds the lane-owned calculator for this model.
    pub fn calculator(&self) -> Result<ChoiceProbabilityCalculator, ChoiceModelError> {
        ChoiceProbabilityCalculator::new(self.mode, self.coefficients.clone(), self.dims.clone())
    }

    /// builds a throwaway calculator for nested sub-model evaluation
    /// (accessibility logsums inside another model's utility function).
    pub fn nested_calculator(&self) -> Result<ChoiceProbabilityCalculator, ChoiceModelError> {
        self.calculator()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::coefficients::{Coefficient, CoefficientRole};

    #[test]
    fn test_factory_builds_calculators_with_its_mode() {
        let coefficients = Arc::new(CoefficientSet::new(
            "factory test",
            vec![Some(Coefficient::new(0, "b0", 1.0, false, CoefficientRole::Generic))],
            None,
        ));
        let factory = ChoiceProbabilityFactory::new(
            coefficients,
            CalculatorMode::Application,
            CalculatorDims::new(4, 0, 1, 0),
        )
        .expect("factory");

        let calculator = factory.calculator().expect("calculator");
        assert_eq!(calculator.mode(), CalculatorMode::Application);
        assert!(!calculator.is_estimation_mode());

        // nested calculators are fresh instances, not shared state
        let mut a = factory.nested_calculator().expect("nested");
        let mut b = factory.nested_calculator().expect("nested");
        a.start_observation(1);
        b.start_observation(2);
        assert_ne!(a.observation_key(), b.observation_key());
    }

    #[test]
    fn test_factory_rejects_empty_coefficients() {
        let empty = Arc::new(CoefficientSet::new("empty", vec![None], None));
        let result = ChoiceProbabilityFactory::new(
            empty,
            CalculatorMode::Application,
            CalculatorDims::new(1, 0, 1, 0),
        );
        assert!(matches!(result, Err(ChoiceModelError::MissingCoefficients)));
    }
}
