use crate::model::estimation::observation::UtilityCell;

/// a reusable slot for one base-level alternative. slots are created once
/// per (calculator, index) and re-stamped with the current observation key
/// by `update`; anything carrying a stale key is invisible to the current
/// observation.
#[derive(Debug, Clone)]
pub(crate) struct Alternative {
    pub index: usize,
    pub key: u64,
    pub available: bool,
    pub is_chosen: bool,
    pub utility: f64,
    pub size: f64,
    pub probability: f64,
    pub nest: Option<usize>,
    /// estimation column holding this alternative's availability flag.
    pub position: Option<usize>,
    /// estimation-mode utility cells, indexed by parameter.
    pub utilities: Vec<Option<UtilityCell>>,
    /// components attached during the current observation (estimation mode).
    pub utility_components: Vec<usize>,
    pub size_components: Vec<usize>,
    pub total_chosen: usize,
    pub total_available: usize,
    pub available_in_summary: bool,
}

impl Alternative {
    pub fn new(index: usize, total_parameters: usize, estimation: bool) -> Alternative {
        Alternative {
            index,
            key: 0,
            available: false,
            is_chosen: false,
            utility: 0.0,
            size: 0.0,
            probability: 0.0,
            nest: None,
            position: None,
            utilities: if estimation {
                vec![None; total_parameters]
            } else {
                Vec::new()
            },
            utility_components: Vec::new(),
            size_components: Vec::new(),
            total_chosen: 0,
            total_available: 0,
            available_in_summary: false,
        }
    }

    /// external id, 1-based as the estimation package expects.
    pub fn id(&self) -> usize {
        self.index + 1
    }

    pub fn label(&self) -> String {
        format!("alt_{}", self.id())
    }

    pub fn update(&mut self, key: u64, available: bool, is_chosen: bool) {
        self.key = key;
        self.available = available;
        self.is_chosen = is_chosen;
        self.utility = 0.0;
        self.size = 0.0;
        self.probability = 0.0;
        self.nest = None;
        self.utility_components.clear();
        self.size_components.clear();
    }

    /// true when any utility cell recorded for this alternative is a size
    /// variable, regardless of observation key.
    pub fn uses_size_variables(&self) -> bool {
        self.utilities
            .iter()
            .flatten()
            .any(|cell| cell.has_size_variable)
    }

    /// true when a size-variable cell stamped with `key` carries a non-zero
    /// value.
    pub fn has_nonzero_size_data(&self, key: u64) -> bool {
        self.utilities
            .iter()
            .flatten()
            .any(|cell| cell.key == key && cell.has_size_variable && !crate::util::numeric::almost_zero(cell.data))
    }
}
