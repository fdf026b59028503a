//! Slippage and commission models.
//!
//! Slippage is always adverse to the trader; the random model draws from the
//! broker's seeded RNG so runs are reproducible.

use rand::rngs::StdRng;
use rand::Rng;

use crate::domain::models::{CommissionModel, SlippageModel};

/// Price amount of slippage for one fill. Always non-negative; the caller
/// applies it in the adverse direction.
pub fn slippage_amount(
    model: SlippageModel,
    rng: &mut StdRng,
    price: f64,
    point_size: f64,
) -> f64 {
    match model {
        SlippageModel::Fixed { points } => points.max(0.0) * point_size,
        SlippageModel::Random { max_points } => {
            if max_points <= 0.0 {
                0.0
            } else {
                rng.gen_range(0.0..=max_points) * point_size
            }
        }
        SlippageModel::Percent { pct } => pct.max(0.0) * price,
    }
}

/// Commission for one side of a trade (entry and exit are charged
/// separately).
pub fn commission_amount(
    model: CommissionModel,
    volume: f64,
    lot_size: f64,
    price: f64,
) -> f64 {
    match model {
        CommissionModel::PerLot { value } => value * volume,
        CommissionModel::Percent { value } => value * volume * lot_size * price,
        CommissionModel::Flat { value } => value,
    }
}
