/// per-nesting-depth accumulator: one default slot for un-nested entries
/// plus one exponentiated-utility sum per sibling nest at that depth. all
/// slots are zeroed at the start of every observation.
#[derive(Debug, Clone)]
pub(crate) struct Level {
    pub default_sum: f64,
    pub sums: Vec<f64>,
}

impl Level {
    pub fn new(total_nests: usize) -> Level {
        Level {
            default_sum: 0.0,
            sums: vec![0.0; total_nests],
        }
    }

    pub fn reset(&mut self) {
        self.default_sum = 0.0;
        for sum in self.sums.iter_mut() {
            *sum = 0.0;
        }
    }
}
