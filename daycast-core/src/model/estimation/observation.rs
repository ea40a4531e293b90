/// one column of the estimation observation vector whose value is a utility
/// term. terms for the same (owner, parameter) pair accumulate within an
/// observation and reset when the observation key changes.
#[derive(Debug, Clone)]
pub(crate) struct UtilityCell {
    pub position: usize,
    pub parameter: usize,
    pub has_size_variable: bool,
    pub key: u64,
    pub data: f64,
    pub total_value: f64,
    pub total_nonzero: usize,
}

impl UtilityCell {
    pub fn new(position: usize, parameter: usize, has_size_variable: bool) -> UtilityCell {
        UtilityCell {
            position,
            parameter,
            has_size_variable,
            key: 0,
            data: 0.0,
            total_value: 0.0,
            total_nonzero: 0,
        }
    }

    pub fn update(&mut self, key: u64, value: f64) {
        if self.key != key {
            self.data = 0.0;
        }
        self.key = key;
        self.data += value;
    }
}

/// the column holding the chosen alternative's id.
#[derive(Debug, Clone)]
pub(crate) struct ChosenCell {
    pub position: usize,
    pub key: u64,
    pub chosen_id: usize,
}

impl ChosenCell {
    pub fn new(position: usize) -> ChosenCell {
        ChosenCell {
            position,
            key: 0,
            chosen_id: 0,
        }
    }

    pub fn update(&mut self, key: u64, chosen_id: usize) {
        self.key = key;
        self.chosen_id = chosen_id;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ComponentKind {
    Utility,
    Size,
}

/// what occupies one column of the observation vector. positions are
/// assigned on first use, in registration order, and never move afterwards
/// so the emitted data file stays positionally stable across observations.
#[derive(Debug, Clone)]
pub(crate) enum ObservationCell {
    /// availability flag of an alternative (1/0).
    Availability { alternative: usize },
    /// a utility term recorded directly on an alternative.
    AlternativeUtility { alternative: usize, parameter: usize },
    /// a utility term recorded on a shared component.
    ComponentUtility {
        kind: ComponentKind,
        component: usize,
        parameter: usize,
    },
    /// the chosen alternative's id.
    Chosen,
}

/// the fixed-position observation vector layout, grown lazily as cells are
/// first touched.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObservationLayout {
    pub cells: Vec<ObservationCell>,
    pub chosen: Option<ChosenCell>,
}

impl ObservationLayout {
    /// claims the next column and records what lives there.
    pub fn push(&mut self, cell: ObservationCell) -> usize {
        let position = self.cells.len();
        self.cells.push(cell);
        position
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
}
