pub mod manager;

pub use manager::{
    AdvanceOutcome, ConfirmedInput, PredictionError, PredictionManager, PredictionStats,
    TickReceipt,
};
