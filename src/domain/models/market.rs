//! Market data and backtest domain types.
//!
//! These feed the deterministic backtest engine: OHLC bars in, orders and
//! positions through a bar-driven state machine, trades and equity points out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLC bar. Bars are fed to the broker in chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    /// Basic sanity: high is the max, low is the min, all prices positive.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.open > 0.0 && self.high > 0.0 && self.low > 0.0 && self.close > 0.0) {
            return Err("bar prices must be positive".to_string());
        }
        let max = self.open.max(self.close);
        let min = self.open.min(self.close);
        if self.high < max || self.low > min {
            return Err("bar high/low must bound open and close".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// A market order request. The only supported order shape is market entry
/// with optional attached SL and TP levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub side: OrderSide,
    /// Volume in lots
    pub volume: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl OrderRequest {
    pub fn market(side: OrderSide, volume: f64) -> Self {
        Self {
            side,
            volume,
            stop_loss: None,
            take_profit: None,
            comment: None,
        }
    }

    pub fn with_stop_loss(mut self, level: f64) -> Self {
        self.stop_loss = Some(level);
        self
    }

    pub fn with_take_profit(mut self, level: f64) -> Self {
        self.take_profit = Some(level);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Queued for next-bar fill
    Pending,
    Filled,
    Canceled,
    Rejected,
}

/// A queued or executed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub side: OrderSide,
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// An execution record: entry or exit of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub position_id: u64,
    pub price: f64,
    pub volume: f64,
    /// Commission charged for this side of the trade (entry and exit are
    /// charged separately)
    pub commission: f64,
    pub timestamp: DateTime<Utc>,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    /// Forced close by the stop-out rule
    Margin,
    /// Closed at the end of the series
    EndOfData,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopLoss => "sl",
            Self::TakeProfit => "tp",
            Self::Manual => "manual",
            Self::Margin => "margin",
            Self::EndOfData => "end_of_data",
        }
    }
}

/// An open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: u64,
    pub side: OrderSide,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub entry_commission: f64,
    /// Floating P&L at the most recent bar close
    pub floating_pnl: f64,
}

impl Position {
    /// Signed price move in the position's favor.
    pub fn price_delta(&self, price: f64) -> f64 {
        match self.side {
            OrderSide::Buy => price - self.entry_price,
            OrderSide::Sell => self.entry_price - price,
        }
    }
}

/// A closed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: u64,
    pub side: OrderSide,
    pub volume: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub close_reason: CloseReason,
    /// P&L before commissions
    pub gross_profit: f64,
    /// Entry + exit commission
    pub commission: f64,
    /// `gross_profit - commission`
    pub net_profit: f64,
}

/// One equity-curve sample, appended per bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub balance: f64,
    pub equity: f64,
    pub used_margin: f64,
    pub free_margin: f64,
    /// `equity / used_margin * 100`; None when no positions are open
    pub margin_level: Option<f64>,
}

/// Slippage model. Slippage is always adverse to the trader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SlippageModel {
    /// Fixed number of points
    Fixed { points: f64 },
    /// Uniform in [0, max_points], deterministic under the config's rng seed
    Random { max_points: f64 },
    /// Fraction of price (e.g. 0.0001 = 1 bp)
    Percent { pct: f64 },
}

impl Default for SlippageModel {
    fn default() -> Self {
        Self::Fixed { points: 0.0 }
    }
}

/// Commission model. Charged on entry and exit separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionModel {
    /// Fixed value per lot of volume
    PerLot { value: f64 },
    /// Fraction of notional (volume × lot_size × price)
    Percent { value: f64 },
    /// Fixed value per fill
    Flat { value: f64 },
}

impl Default for CommissionModel {
    fn default() -> Self {
        Self::Flat { value: 0.0 }
    }
}

/// Backtest engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub starting_balance: f64,
    pub leverage: f64,
    /// Contract size: units per lot
    pub lot_size: f64,
    /// Price increment one "point" of slippage corresponds to
    pub point_size: f64,
    #[serde(default)]
    pub slippage_model: SlippageModel,
    #[serde(default)]
    pub commission_model: CommissionModel,
    /// Margin level (%) below which a margin call is emitted
    pub margin_call_level: f64,
    /// Margin level (%) below which positions are force-closed
    pub stop_out_level: f64,
    #[serde(default)]
    pub allow_hedging: bool,
    pub rng_seed: u64,
    #[serde(default)]
    pub debug: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            starting_balance: 10_000.0,
            leverage: 100.0,
            lot_size: 100_000.0,
            point_size: 0.0001,
            slippage_model: SlippageModel::default(),
            commission_model: CommissionModel::default(),
            margin_call_level: 100.0,
            stop_out_level: 50.0,
            allow_hedging: false,
            rng_seed: 42,
            debug: false,
        }
    }
}

/// Events produced by the broker during a bar step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    OrderFilled {
        order_id: u64,
        position_id: u64,
        price: f64,
    },
    OrderRejected {
        order_id: u64,
        reason: String,
    },
    PositionClosed {
        position_id: u64,
        price: f64,
        reason: CloseReason,
        net_profit: f64,
    },
    MarginCall {
        margin_level: f64,
    },
    StopOut {
        position_id: u64,
        margin_level: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    #[test]
    fn test_bar_validation() {
        assert!(bar(100.0, 105.0, 95.0, 102.0).validate().is_ok());
        // High below close
        assert!(bar(100.0, 101.0, 95.0, 102.0).validate().is_err());
        // Low above open
        assert!(bar(100.0, 105.0, 101.0, 102.0).validate().is_err());
        // Non-positive price
        assert!(bar(0.0, 105.0, 95.0, 102.0).validate().is_err());
    }

    #[test]
    fn test_position_price_delta_sign() {
        let long = Position {
            id: 1,
            side: OrderSide::Buy,
            volume: 1.0,
            entry_price: 100.0,
            stop_loss: None,
            take_profit: None,
            entry_time: Utc::now(),
            entry_commission: 0.0,
            floating_pnl: 0.0,
        };
        assert!(long.price_delta(101.0) > 0.0);
        assert!(long.price_delta(99.0) < 0.0);

        let short = Position {
            side: OrderSide::Sell,
            ..long
        };
        assert!(short.price_delta(99.0) > 0.0);
        assert!(short.price_delta(101.0) < 0.0);
    }

    #[test]
    fn test_sim_config_serde_tagged_models() {
        let config = SimConfig {
            slippage_model: SlippageModel::Random { max_points: 2.0 },
            commission_model: CommissionModel::PerLot { value: 7.0 },
            ..SimConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"model\":\"random\""));
        assert!(json.contains("\"model\":\"per_lot\""));

        let back: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_close_reason_wire_names() {
        assert_eq!(CloseReason::TakeProfit.as_str(), "tp");
        assert_eq!(CloseReason::StopLoss.as_str(), "sl");
        assert_eq!(CloseReason::Margin.as_str(), "margin");
    }
}
