/// how a coefficient participates in utility accumulation. every coefficient
/// carries exactly one role; [`crate::model::choice::ChoiceProbabilityCalculator`]
/// matches on it exhaustively when a utility term arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoefficientRole {
    /// ordinary linear-in-parameters term: `utility += value * coefficient`.
    Generic,
    /// size variable: `size += value * exp(coefficient)`.
    Size,
    /// reference size variable with an implicit coefficient of one:
    /// `size += value`.
    BaseSize,
    /// multiplier applied to `ln(size)` at simulation time; excluded from
    /// the additive utility entirely.
    SizeFunctionMultiplier,
    /// dispersion (theta) parameter of a nest; treated like a generic term
    /// when it appears in a utility expression.
    NestDispersion,
}

impl CoefficientRole {
    pub fn is_size_variable(&self) -> bool {
        matches!(self, CoefficientRole::Size | CoefficientRole::BaseSize)
    }
}

/// one estimated parameter: its model-wide index, starting value, and role.
#[derive(Debug, Clone)]
pub struct Coefficient {
    pub parameter: usize,
    pub value: f64,
    pub fixed: bool,
    pub role: CoefficientRole,
    label: String,
}

impl Coefficient {
    pub fn new(
        parameter: usize,
        label: impl Into<String>,
        value: f64,
        fixed: bool,
        role: CoefficientRole,
    ) -> Coefficient {
        Coefficient {
            parameter,
            value,
            fixed,
            role,
            label: label.into(),
        }
    }

    pub fn label(&self) -> String {
        if self.label.is_empty() {
            format!("par_{}", self.parameter)
        } else {
            self.label.clone()
        }
    }
}

/// an ordered, index-addressed coefficient table. parameter indices are the
/// model's own numbering; gaps are permitted and lookups outside the table
/// resolve to `None` (the calculator silently drops such terms).
#[derive(Debug, Clone)]
pub struct CoefficientSet {
    title: String,
    coefficients: Vec<Option<Coefficient>>,
    size_function_multiplier: Option<Coefficient>,
}

impl CoefficientSet {
    pub fn new(
        title: impl Into<String>,
        coefficients: Vec<Option<Coefficient>>,
        size_function_multiplier: Option<Coefficient>,
    ) -> CoefficientSet {
        CoefficientSet {
            title: title.into(),
            coefficients,
            size_function_multiplier,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn get(&self, parameter: usize) -> Option<&Coefficient> {
        self.coefficients.get(parameter).and_then(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.iter().all(|c| c.is_none())
    }

    /// the defined coefficients in parameter order.
    pub fn iter(&self) -> impl Iterator<Item = &Coefficient> {
        self.coefficients.iter().filter_map(|c| c.as_ref())
    }

    pub fn size_function_multiplier(&self) -> Option<&Coefficient> {
        self.size_function_multiplier.as_ref()
    }

    /// multiplier applied to `ln(size)` during choice simulation. a model
    /// with size variables but no declared multiplier uses 1.0, i.e. the
    /// raw log-size term.
    pub fn size_multiplier_value(&self) -> f64 {
        self.size_function_multiplier
            .as_ref()
            .map(|c| c.value)
            .unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic(parameter: usize, value: f64) -> Coefficient {
        Coefficient::new(parameter, format!("b{parameter}"), value, false, CoefficientRole::Generic)
    }

    #[test]
    fn test_lookup_outside_table_is_none() {
        let set = CoefficientSet::new("test", vec![None, Some(generic(1, 0.5))], None);
        assert!(set.get(0).is_none());
        assert!(set.get(1).is_some());
        assert!(set.get(99).is_none());
    }

    #[test]
    fn test_label_falls_back_to_parameter_index() {
        let unnamed = Coefficient::new(7, "", 1.0, false, CoefficientRole::Generic);
        assert_eq!(unnamed.label(), "par_7");
        assert_eq!(generic(3, 0.0).label(), "b3");
    }

    #[test]
    fn test_size_multiplier_defaults_to_one() {
        let set = CoefficientSet::new("test", vec![Some(generic(0, 1.0))], None);
        assert_eq!(set.size_multiplier_value(), 1.0);

        let lsm = Coefficient::new(9, "LSM_x", 0.7, false, CoefficientRole::SizeFunctionMultiplier);
        let set = CoefficientSet::new("test", vec![], Some(lsm));
        assert_eq!(set.size_multiplier_value(), 0.7);
    }

    #[test]
    fn test_role_size_classification() {
        assert!(CoefficientRole::Size.is_size_variable());
        assert!(CoefficientRole::BaseSize.is_size_variable());
        assert!(!CoefficientRole::Generic.is_size_variable());
        assert!(!CoefficientRole::SizeFunctionMultiplier.is_size_variable());
    }
}
