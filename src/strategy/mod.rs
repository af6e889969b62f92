//! Strategy: fee schedules and leap scoring.
//!
//! Everything in here is pure: given a source holding and a market
//! snapshot, it prices candidates and says which ones clear breakeven.
//! Mutation happens in `engine`.

pub mod fees;
pub mod scorer;

pub use fees::{FeeModel, FeeStructure};
pub use scorer::{OpportunityScorer, ScorerConfig};
