/// how a sampled alternative entered the sample, which controls the
/// calculator slot it is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlternativeKind {
    /// a Monte-Carlo draw; takes the next free slot.
    Drawn,
    /// the survey-reported chosen location, force-added in estimation mode.
    Chosen,
    /// the decision maker's usual location; pinned to the slot one past the
    /// sample so models can address it directly.
    Usual,
}

/// one deduplicated destination alternative drawn from a single origin,
/// with the quantities the importance-sampling correction needs.
#[derive(Debug, Clone)]
pub struct TourSampleItem {
    pub parcel_id: u64,
    pub sequence: usize,
    /// destination zone index within the frame.
    pub zone: usize,
    /// attraction size of the drawn parcel within its zone.
    pub size: f64,
    pub total_size: f64,
    /// size mass removed from the destination zone by exclusion bookkeeping.
    pub excluded_size: f64,
    pub weight_from_origin: f64,
    pub total_weight_from_origin: f64,
    /// two-stage inclusion probability of one draw landing here.
    pub probability: f64,
    /// importance-sampling correction, `-ln(N * p / multiplicity)`.
    pub adjustment_factor: f64,
    pub available: bool,
    pub is_chosen: bool,
    /// calculator slot registered for this alternative, when the sample was
    /// routed through a calculator.
    pub alternative: Option<usize>,
}

/// one deduplicated destination alternative for the intermediate-stop
/// variant, carrying an inclusion probability from each of the two origins.
#[derive(Debug, Clone)]
pub struct StopSampleItem {
    pub parcel_id: u64,
    pub sequence: usize,
    pub zone: usize,
    pub size: f64,
    pub total_size: f64,
    pub excluded_size: f64,
    pub tour_weight_from_origin: f64,
    pub total_tour_weight_from_origin: f64,
    pub trip_weight_from_origin: f64,
    pub total_trip_weight_from_origin: f64,
    /// inclusion probability from the tour-origin perspective.
    pub probability1: f64,
    /// inclusion probability from the trip-origin perspective.
    pub probability2: f64,
    pub adjustment_factor: f64,
    pub available: bool,
    pub is_chosen: bool,
    pub alternative: Option<usize>,
}
