//! SimBroker end-to-end properties: the documented intrabar tie-break,
//! bit-identical seeded runs, mass balance, and fill-range bounds.

use chrono::{TimeZone, Utc};

use algoswarm::domain::models::{
    Bar, BrokerEvent, CloseReason, CommissionModel, OrderRequest, OrderSide, SimConfig,
    SlippageModel,
};
use algoswarm::sim::SimBroker;

fn bar_at(minute: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
    Bar {
        timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 10, minute, 0).unwrap(),
        open,
        high,
        low,
        close,
        volume: Some(1_000.0),
    }
}

fn config() -> SimConfig {
    SimConfig {
        starting_balance: 10_000.0,
        leverage: 100.0,
        lot_size: 100.0,
        point_size: 0.01,
        margin_call_level: 100.0,
        stop_out_level: 50.0,
        rng_seed: 42,
        ..SimConfig::default()
    }
}

#[test]
fn test_scenario_e_long_intrabar_tie_break() {
    // Long entry filled at 100.0; next bar {open:100, high:105, low:95,
    // close:102}, SL=96, TP=104. The long traversal open → high reaches the
    // TP before the low, so close_reason is tp and close_price is 104.
    let mut broker = SimBroker::new(config());
    broker.step_bar(bar_at(0, 100.0, 100.5, 99.5, 100.0)).unwrap();
    broker
        .place_order(
            OrderRequest::market(OrderSide::Buy, 1.0)
                .with_stop_loss(96.0)
                .with_take_profit(104.0),
        )
        .unwrap();
    broker.step_bar(bar_at(1, 100.0, 100.1, 99.9, 100.0)).unwrap();
    assert_eq!(broker.get_positions().len(), 1);
    assert_eq!(broker.get_positions()[0].entry_price, 100.0);

    let events = broker.step_bar(bar_at(2, 100.0, 105.0, 95.0, 102.0)).unwrap();

    let trades = broker.get_trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].close_reason, CloseReason::TakeProfit);
    assert_eq!(trades[0].exit_price, 104.0);
    assert!(events.iter().any(|e| matches!(
        e,
        BrokerEvent::PositionClosed {
            reason: CloseReason::TakeProfit,
            ..
        }
    )));
    // Net profit: (104 - 100) * 1 lot * 100 units, zero costs by default
    assert_eq!(trades[0].net_profit, 400.0);
}

#[test]
fn test_scenario_e_mirror_short_tie_break() {
    // Mirror: short traversal open → low reaches the TP below before the SL
    // above.
    let mut broker = SimBroker::new(config());
    broker.step_bar(bar_at(0, 100.0, 100.5, 99.5, 100.0)).unwrap();
    broker
        .place_order(
            OrderRequest::market(OrderSide::Sell, 1.0)
                .with_stop_loss(104.0)
                .with_take_profit(96.0),
        )
        .unwrap();
    broker.step_bar(bar_at(1, 100.0, 100.1, 99.9, 100.0)).unwrap();

    broker.step_bar(bar_at(2, 100.0, 105.0, 95.0, 102.0)).unwrap();
    let trades = broker.get_trades();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].close_reason, CloseReason::TakeProfit);
    assert_eq!(trades[0].exit_price, 96.0);
}

fn scripted_run(seed: u64) -> (Vec<algoswarm::domain::models::Trade>, Vec<algoswarm::domain::models::EquityPoint>) {
    let mut broker = SimBroker::new(SimConfig {
        slippage_model: SlippageModel::Random { max_points: 2.0 },
        commission_model: CommissionModel::PerLot { value: 3.5 },
        rng_seed: seed,
        ..config()
    });

    let bars = [
        bar_at(0, 100.0, 100.8, 99.4, 100.2),
        bar_at(1, 100.2, 101.0, 99.8, 100.6),
        bar_at(2, 100.6, 102.2, 100.1, 101.8),
        bar_at(3, 101.8, 102.4, 100.3, 100.9),
        bar_at(4, 100.9, 101.5, 99.2, 99.6),
        bar_at(5, 99.6, 100.4, 98.8, 100.1),
    ];

    for (index, bar) in bars.iter().enumerate() {
        broker.step_bar(*bar).unwrap();
        if index == 0 {
            broker
                .place_order(
                    OrderRequest::market(OrderSide::Buy, 0.5)
                        .with_stop_loss(99.0)
                        .with_take_profit(102.0),
                )
                .unwrap();
        }
        if index == 3 {
            broker
                .place_order(
                    OrderRequest::market(OrderSide::Sell, 0.5)
                        .with_stop_loss(102.5)
                        .with_take_profit(99.0),
                )
                .unwrap();
        }
    }
    (broker.get_trades().to_vec(), broker.equity_curve().to_vec())
}

#[test]
fn test_same_seed_bit_identical_runs() {
    let (trades_a, curve_a) = scripted_run(1234);
    let (trades_b, curve_b) = scripted_run(1234);

    // Field-by-field equality, including every float bit
    assert_eq!(trades_a, trades_b);
    assert_eq!(curve_a, curve_b);
    assert!(!trades_a.is_empty());
    for (a, b) in trades_a.iter().zip(&trades_b) {
        assert_eq!(a.exit_price.to_bits(), b.exit_price.to_bits());
        assert_eq!(a.net_profit.to_bits(), b.net_profit.to_bits());
    }
}

#[test]
fn test_mass_balance_over_scripted_run() {
    let (trades, curve) = scripted_run(1234);
    let net_sum: f64 = trades.iter().map(|t| t.net_profit).sum();
    let final_balance = curve.last().unwrap().balance;
    assert!(
        (final_balance - (10_000.0 + net_sum)).abs() < 1e-9,
        "balance {final_balance} != 10000 + {net_sum}"
    );
}

#[test]
fn test_no_fill_outside_bar_range_beyond_adverse_slippage() {
    let max_slippage = 2.0 * 0.01;
    let mut broker = SimBroker::new(SimConfig {
        slippage_model: SlippageModel::Random { max_points: 2.0 },
        rng_seed: 99,
        ..config()
    });

    let bars = [
        bar_at(0, 100.0, 100.8, 99.4, 100.2),
        bar_at(1, 100.2, 101.4, 99.6, 101.0),
        bar_at(2, 101.0, 103.0, 100.4, 102.2),
    ];
    broker.step_bar(bars[0]).unwrap();
    broker
        .place_order(
            OrderRequest::market(OrderSide::Buy, 0.5)
                .with_stop_loss(99.5)
                .with_take_profit(102.0),
        )
        .unwrap();

    for bar in &bars[1..] {
        let events = broker.step_bar(*bar).unwrap();
        for event in events {
            let price = match event {
                BrokerEvent::OrderFilled { price, .. }
                | BrokerEvent::PositionClosed { price, .. } => price,
                _ => continue,
            };
            assert!(
                price >= bar.low - max_slippage && price <= bar.high + max_slippage,
                "fill at {price} outside [{}, {}] extended by {max_slippage}",
                bar.low,
                bar.high
            );
        }
    }
}

#[test]
fn test_commission_charged_on_entry_and_exit() {
    let mut broker = SimBroker::new(SimConfig {
        commission_model: CommissionModel::PerLot { value: 3.5 },
        ..config()
    });
    broker.step_bar(bar_at(0, 100.0, 100.5, 99.5, 100.0)).unwrap();
    broker
        .place_order(OrderRequest::market(OrderSide::Buy, 2.0).with_take_profit(101.0))
        .unwrap();
    broker.step_bar(bar_at(1, 100.0, 100.2, 99.8, 100.1)).unwrap();
    broker.step_bar(bar_at(2, 100.1, 101.5, 99.9, 101.2)).unwrap();

    let trades = broker.get_trades();
    assert_eq!(trades.len(), 1);
    // 3.5 per lot, 2 lots, entry plus exit
    assert_eq!(trades[0].commission, 14.0);
    assert_eq!(trades[0].net_profit, trades[0].gross_profit - 14.0);
}

#[test]
fn test_report_metrics_match_trades() {
    let mut broker = SimBroker::new(config());
    broker.step_bar(bar_at(0, 100.0, 100.5, 99.5, 100.0)).unwrap();
    broker
        .place_order(
            OrderRequest::market(OrderSide::Buy, 1.0)
                .with_stop_loss(99.0)
                .with_take_profit(101.0),
        )
        .unwrap();
    broker.step_bar(bar_at(1, 100.0, 100.3, 99.7, 100.1)).unwrap();
    broker.step_bar(bar_at(2, 100.1, 101.2, 99.8, 101.0)).unwrap();

    let report = broker.generate_report();
    assert_eq!(report.metrics.total_trades, 1);
    assert_eq!(report.metrics.winning_trades, 1);
    assert_eq!(report.metrics.win_rate, 1.0);
    assert_eq!(
        report.metrics.total_net_pnl,
        report.trades.iter().map(|t| t.net_profit).sum::<f64>()
    );
    assert_eq!(report.equity_curve.len(), 3);
}
