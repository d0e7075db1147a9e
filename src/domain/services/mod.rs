mod affinity_manager;

pub use affinity_manager::{AffinityError, AffinityManager, RenewOutcome};
