use crate::model::estimation::observation::UtilityCell;

/// a reusable bundle of utility or size terms shared between alternatives.
/// in application mode the accumulated utility/size is added to each
/// alternative the component is attached to; in estimation mode the
/// component's cells join the attached alternative's observation row.
#[derive(Debug, Clone)]
pub(crate) struct Component {
    pub index: usize,
    pub key: u64,
    pub utility: f64,
    pub size: f64,
    pub utilities: Vec<Option<UtilityCell>>,
}

impl Component {
    pub fn new(index: usize, total_parameters: usize, estimation: bool) -> Component {
        Component {
            index,
            key: 0,
            utility: 0.0,
            size: 0.0,
            utilities: if estimation {
                vec![None; total_parameters]
            } else {
                Vec::new()
            },
        }
    }

    pub fn update(&mut self, key: u64) {
        self.key = key;
        self.utility = 0.0;
        self.size = 0.0;
    }

    pub fn has_nonzero_data(&self) -> bool {
        self.utilities
            .iter()
            .flatten()
            .any(|cell| !crate::util::numeric::almost_zero(cell.data))
    }
}
