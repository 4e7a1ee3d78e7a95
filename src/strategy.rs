// =============================================================================
// Strategy Engine — the per-tick trading pipeline
// =============================================================================
//
// Entry path (no position):
//   fresh tick -> probe ATM leg -> bias -> strike ladder -> smart money ->
//   entry gates -> adaptive pipeline -> sizing -> risk gate -> orders ->
//   trade registered
//
// Management path (position open):
//   emergency-exit broadcast -> per-trade greeks update -> smart exit ->
//   exit orders -> close bookkeeping (journal, risk, alerts, learning)
//
// The engine is owned by the tick loop task; shared state lives in AppState.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Timelike, Utc};
use tracing::{debug, info, warn};

use crate::adaptive::{BucketTuple, RegimeSignals, SignalSnapshot, TradeFeatures};
use crate::alerts::{AlertKind, AlertSeverity};
use crate::app_state::AppState;
use crate::bias::{BiasInputs, BiasState};
use crate::broker::api::build_option_symbol;
use crate::entry::EntryEngine;
use crate::risk::ProposedExposure;
use crate::sizing::{PositionSizing, SizingGreeks};
use crate::smart_exit::{ExitCheckInputs, ExitConfig, SmartExitEngine};
use crate::smart_money::{oi, SmartMoneyDetector, StrikeObservation, ZoneLeg};
use crate::strike_selector::{StrikeQuote, StrikeSelector};
use crate::trade_manager::{Trade, TradeOpen};
use crate::types::{GreeksSnapshot, OptionType, Tick};

/// Hard SL placed at 7% under the entry premium.
const SL_FRACTION: f64 = 0.93;
/// Target placed at 7% over the entry premium.
const TARGET_FRACTION: f64 = 1.07;

/// What one tick did; the loop logs transitions and tests assert on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    OutsideSession,
    StaleData,
    DailyLimit(String),
    NoEntry(String),
    Entered(String),
    Managed,
}

/// Book-keeping carried from entry to close for the learning layer.
struct EntryRecord {
    buckets: BucketTuple,
}

pub struct StrategyEngine {
    entry_engine: EntryEngine,
    strike_selector: StrikeSelector,
    sizing: PositionSizing,
    smart_money: SmartMoneyDetector,
    smart_exit: SmartExitEngine,
    prev_spot: Option<f64>,
    entry_records: HashMap<String, EntryRecord>,
}

impl StrategyEngine {
    pub fn new(state: &AppState) -> Self {
        let config = &state.config;
        Self {
            entry_engine: EntryEngine::new(config.filters.clone()),
            strike_selector: StrikeSelector::new(
                config.instrument.clone(),
                config.filters.clone(),
            ),
            sizing: PositionSizing::new(
                config.risk.clone(),
                config.adaptive.clone(),
                config.instrument.minimum_lot_size,
            ),
            smart_money: SmartMoneyDetector::new(config.filters.trap_probability_max),
            smart_exit: SmartExitEngine::new(ExitConfig::from_tuning(
                &config.exits,
                config.instrument.minimum_lot_size,
            )),
            prev_spot: None,
            entry_records: HashMap::new(),
        }
    }

    // =========================================================================
    // One tick
    // =========================================================================

    pub async fn tick(&mut self, state: &Arc<AppState>) -> TickOutcome {
        state
            .ticks_processed
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.smart_money.prune();

        // Open positions are managed even outside the entry window.
        if state.trades.has_active() {
            self.manage_positions(state).await;
            return TickOutcome::Managed;
        }

        let (allowed, reason) = state.risk.can_take_trade(None);
        if !allowed {
            let reason = reason.unwrap_or_else(|| "risk denied".to_string());
            return TickOutcome::DailyLimit(reason);
        }

        if !state.in_session_window() {
            return TickOutcome::OutsideSession;
        }

        let Some(tick) = state.gateway.fresh_tick() else {
            metrics::counter!("meridian_stale_ticks_total", 1);
            return TickOutcome::StaleData;
        };

        match self.seek_entry(state, &tick).await {
            Ok(trade_id) => TickOutcome::Entered(trade_id),
            Err(reason) => {
                *state.last_entry_block.write() = Some(reason.clone());
                TickOutcome::NoEntry(reason)
            }
        }
    }

    // =========================================================================
    // Entry path
    // =========================================================================

    async fn seek_entry(&mut self, state: &Arc<AppState>, tick: &Tick) -> Result<String, String> {
        let config = &state.config;
        let spot = tick.ltp;
        let expiry = *state.expiry.read();
        let minutes_to_expiry = state.minutes_to_expiry();

        if minutes_to_expiry <= config.exits.exit_before_expiry_minutes {
            return Err("inside the expiry rush window".to_string());
        }

        // ── Probe leg: ATM on the side spot momentum suggests ──────
        let probe_side = match self.prev_spot {
            Some(prev) if spot < prev => OptionType::PE,
            _ => OptionType::CE,
        };
        self.prev_spot = Some(spot);

        let atm = self.strike_selector.atm_strike(spot);
        let probe_symbol = build_option_symbol(
            &config.instrument.primary_underlying,
            expiry,
            atm,
            probe_side,
        );
        state.greeks_cache.track(&probe_symbol);

        if state.greeks_cache.get(&probe_symbol, true).await.is_none() {
            return Err(format!("no greeks for probe leg {probe_symbol}"));
        }
        let Some((probe_cur, probe_prev)) = state.greeks_cache.rolling(&probe_symbol) else {
            return Err(format!("probe leg {probe_symbol} warming up"));
        };

        // ── Bias ────────────────────────────────────────────────────
        let bias = state.bias.write().update(BiasInputs {
            delta: probe_cur.delta,
            prev_gamma: probe_prev.gamma,
            gamma: probe_cur.gamma,
            oi: probe_cur.oi,
            oi_change: probe_cur.oi as f64 - probe_prev.oi as f64,
            ltp: probe_cur.ltp,
            prev_ltp: probe_prev.ltp,
            volume: probe_cur.volume,
            prev_volume: probe_prev.volume,
            iv: probe_cur.iv,
            prev_iv: probe_prev.iv,
        });
        state.increment_version();

        let side = match bias.state {
            BiasState::Bullish => OptionType::CE,
            BiasState::Bearish => OptionType::PE,
            BiasState::NoTrade | BiasState::Unknown => {
                return Err(format!("bias {} (conf {:.0})", bias.state, bias.confidence));
            }
        };

        // ── Strike ladder + ATM-zone battlefield ────────────────────
        let mut candidates = Vec::new();
        let mut ce_legs = Vec::new();
        let mut pe_legs = Vec::new();
        for strike in self.strike_selector.ladder(spot) {
            for zone_side in [OptionType::CE, OptionType::PE] {
                let symbol = build_option_symbol(
                    &config.instrument.primary_underlying,
                    expiry,
                    strike,
                    zone_side,
                );
                let Some(snapshot) = state.greeks_cache.get(&symbol, false).await else {
                    continue;
                };

                let leg = ZoneLeg {
                    strike: strike as f64,
                    oi: snapshot.oi,
                    volume: snapshot.volume,
                    delta: snapshot.delta,
                };
                match zone_side {
                    OptionType::CE => ce_legs.push(leg),
                    OptionType::PE => pe_legs.push(leg),
                }

                if zone_side == side {
                    candidates.push(StrikeQuote { strike, snapshot });
                }
            }
        }

        let battlefield = self.smart_money.battlefield(&ce_legs, &pe_legs);
        *state.last_battlefield.write() = Some(battlefield);

        let Some(leg) = self.strike_selector.select(spot, side, &candidates) else {
            return Err("no tradeable strike in the ladder".to_string());
        };

        state.greeks_cache.track(&leg.symbol);
        let Some((current, previous)) = state.greeks_cache.rolling(&leg.symbol) else {
            return Err(format!("leg {} warming up", leg.symbol));
        };

        // ── Smart money ─────────────────────────────────────────────
        let smart_money = self.smart_money.assess(StrikeObservation {
            strike: leg.strike as f64,
            spot,
            strike_interval: config.instrument.strike_interval as f64,
            minutes_to_expiry,
            current: &current,
            previous: &previous,
        });
        *state.last_smart_money.write() = Some(smart_money.clone());

        // ── Entry gates ─────────────────────────────────────────────
        let outcome =
            self.entry_engine
                .evaluate(&bias, &current, &previous, &smart_money, leg.strike);
        let context = match outcome.context() {
            Some(context) => context.clone(),
            None => {
                return Err(outcome
                    .block_reason()
                    .unwrap_or("entry refused")
                    .to_string());
            }
        };

        // ── Adaptive pipeline ───────────────────────────────────────
        let price_change_pct = if previous.ltp > 0.0 {
            (current.ltp - previous.ltp) / previous.ltp * 100.0
        } else {
            0.0
        };
        let regime_signals = RegimeSignals {
            price_range_pct: price_change_pct.abs(),
            higher_highs: bias.state == BiasState::Bullish,
            lower_lows: bias.state == BiasState::Bearish,
            vix_proxy: current.iv,
            atr_pct: price_change_pct.abs(),
            roc_short: price_change_pct,
            roc_medium: price_change_pct / 2.0,
            oi_imbalance: if current.oi > 0 {
                (current.oi as f64 - previous.oi as f64) / current.oi as f64
            } else {
                0.0
            },
            iv_expanding: current.iv > previous.iv,
            volume_surging: current.volume as f64 > previous.volume as f64 * 1.5,
        };
        let signal = SignalSnapshot {
            minute_of_day: state.ist_minute_of_day(),
            bias_confidence: bias.confidence,
            gamma: context.entry_gamma,
            theta: context.entry_theta,
            oi_conviction: oi::conviction(pct_change(current.oi as f64, previous.oi as f64)),
            iv: context.entry_iv,
        };

        let decision = state
            .adaptive
            .write()
            .evaluate_signal(signal, &regime_signals);
        *state.last_decision.write() = Some(decision.clone());

        if !decision.should_trade {
            let reason = decision
                .block_reason
                .unwrap_or_else(|| "adaptive refused".to_string());
            warn!(reason = %reason, "adaptive pipeline blocked entry");
            return Err(reason);
        }

        // ── Sizing ──────────────────────────────────────────────────
        let entry_price = context.entry_price;
        let sl_price = entry_price * SL_FRACTION;
        let target_price = entry_price * TARGET_FRACTION;

        let position = self.sizing.calculate(
            entry_price,
            sl_price,
            target_price,
            None,
            Some(SizingGreeks {
                delta: context.entry_delta,
                gamma: context.entry_gamma,
                iv: context.entry_iv,
                bias_confidence: bias.confidence,
                oi_change: current.oi as f64 - previous.oi as f64,
            }),
        );
        if !position.sizing_valid {
            return Err(position
                .rejection_reason
                .unwrap_or_else(|| "sizing invalid".to_string()));
        }

        // Adaptive multiplier on top, kept lot-aligned.
        let lot = config.instrument.minimum_lot_size.max(1);
        let adjusted = (position.quantity as f64 * decision.recommended_size) as u32;
        let quantity = (adjusted / lot) * lot;
        if quantity == 0 {
            return Err(format!(
                "adaptive size multiplier {:.2} leaves no whole lot",
                decision.recommended_size
            ));
        }

        // ── Risk gate ───────────────────────────────────────────────
        let (allowed, reason) = state.risk.can_take_trade(Some(ProposedExposure {
            delta: context.entry_delta,
            gamma: context.entry_gamma,
            theta: context.entry_theta,
            vega: current.vega,
            quantity,
        }));
        if !allowed {
            let reason = reason.unwrap_or_else(|| "risk denied".to_string());
            warn!(reason = %reason, "risk manager denied entry");
            return Err(reason);
        }

        // ── Orders ──────────────────────────────────────────────────
        let order_id = match state
            .orders
            .place_entry(&leg.symbol, quantity, entry_price)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                state.alerts.send_alert(
                    AlertSeverity::Error,
                    AlertKind::SystemError,
                    "Entry order failed",
                    &format!("{e:#}"),
                    Some(serde_json::json!({ "symbol": leg.symbol })),
                );
                return Err(format!("order placement failed: {e}"));
            }
        };

        if let Err(e) = state
            .orders
            .place_stop_loss(&leg.symbol, quantity, sl_price)
            .await
        {
            // The in-engine hard SL still protects the trade.
            state.alerts.send_alert(
                AlertSeverity::Warning,
                AlertKind::PositionRisk,
                "Linked SL placement failed",
                &format!("{e:#}"),
                Some(serde_json::json!({ "symbol": leg.symbol })),
            );
        }

        // ── Register ────────────────────────────────────────────────
        let trade_id = state.trades.open_trade(TradeOpen {
            underlying: config.instrument.primary_underlying.clone(),
            symbol: leg.symbol.clone(),
            expiry,
            strike: leg.strike,
            option_type: side,
            quantity,
            entry_price,
            entry_delta: context.entry_delta,
            entry_gamma: context.entry_gamma,
            entry_theta: context.entry_theta,
            entry_iv: context.entry_iv,
            sl_price,
            target_price,
            entry_reason_tags: context.reason_tags.clone(),
            entry_order_id: order_id,
        });

        state
            .risk
            .record_entry(quantity as f64 * (entry_price - sl_price).abs());
        state.risk.update_portfolio(state.trades.portfolio_greeks());
        self.entry_records.insert(
            trade_id.clone(),
            EntryRecord {
                buckets: decision.buckets,
            },
        );

        state.alerts.send_alert(
            AlertSeverity::Info,
            AlertKind::TradeEntry,
            &format!("Entry: BUY {quantity} {}", leg.symbol),
            &format!("Entered {} @ {entry_price:.2} (SL {sl_price:.2}, target {target_price:.2})", leg.symbol),
            Some(serde_json::json!({
                "trade_id": trade_id,
                "confidence": context.confidence,
                "adaptive_size": decision.recommended_size,
                "reason_tags": context.reason_tags,
            })),
        );
        state.increment_version();

        info!(trade_id = %trade_id, symbol = %leg.symbol, quantity, "trade entered");
        Ok(trade_id)
    }

    // =========================================================================
    // Management path
    // =========================================================================

    async fn manage_positions(&mut self, state: &Arc<AppState>) {
        // Kill-switch broadcast beats everything else.
        if let Some(reason) = state.risk.take_emergency_exit() {
            self.exit_all(state, &reason).await;
            return;
        }

        let minutes_to_expiry = state.minutes_to_expiry();

        for trade in state.trades.active_trades() {
            // Forced refresh: the exit decision must see this tick's quote.
            let Some(snapshot) = state.greeks_cache.get(&trade.symbol, true).await else {
                debug!(symbol = %trade.symbol, "greeks unavailable, skipping update this tick");
                continue;
            };
            state.trades.update_current(&trade.id, &snapshot);

            let exit = self.smart_exit.check_exit(ExitCheckInputs {
                trade_id: &trade.id,
                current_price: snapshot.ltp,
                current_delta: snapshot.delta,
                current_gamma: snapshot.gamma,
                current_theta: snapshot.theta,
                current_iv: snapshot.iv,
                entry_price: trade.entry_price,
                entry_delta: trade.entry_delta,
                entry_gamma: trade.entry_gamma,
                entry_iv: trade.entry_iv,
                sl_price: trade.sl_price,
                target_price: trade.target_price,
                entry_time: trade.entry_time,
                time_to_expiry_minutes: minutes_to_expiry,
                quantity: trade.quantity,
                exited_qty: trade.exited_qty(),
            });

            let Some(exit) = exit else {
                continue;
            };

            if exit.partial_exit {
                match state
                    .orders
                    .place_exit(&trade.symbol, exit.qty_exited)
                    .await
                {
                    Ok(_) => {
                        state
                            .trades
                            .apply_partial_exit(&trade.id, exit.qty_exited, exit.exit_price);
                        state.risk.update_portfolio(state.trades.portfolio_greeks());
                        state.alerts.send_alert(
                            AlertSeverity::Info,
                            AlertKind::TradeExit,
                            &format!("Partial exit: {} x{}", trade.symbol, exit.qty_exited),
                            &format!(
                                "Ladder exit at {:.2} ({:.1}% pnl), {} remaining",
                                exit.exit_price, exit.pnl_percent, exit.qty_remaining
                            ),
                            Some(serde_json::json!({ "trade_id": trade.id })),
                        );
                        state.increment_version();
                    }
                    Err(e) => {
                        state.alerts.send_alert(
                            AlertSeverity::Error,
                            AlertKind::SystemError,
                            "Partial exit order failed",
                            &format!("{e:#}"),
                            Some(serde_json::json!({ "trade_id": trade.id })),
                        );
                    }
                }
                continue;
            }

            let remaining = trade.quantity - trade.exited_qty();
            match state.orders.place_exit(&trade.symbol, remaining).await {
                Ok(_) => {
                    self.finalize_close(
                        state,
                        &trade.id,
                        exit.exit_price,
                        &exit.trigger.to_string(),
                        vec![exit.trigger.to_string().to_lowercase()],
                    );
                }
                Err(e) => {
                    // Trigger re-fires next tick; never silently drop it.
                    state.alerts.send_alert(
                        AlertSeverity::Error,
                        AlertKind::SystemError,
                        "Exit order failed",
                        &format!("{e:#}"),
                        Some(serde_json::json!({ "trade_id": trade.id })),
                    );
                }
            }
        }

        state.risk.update_portfolio(state.trades.portfolio_greeks());
    }

    /// Close every open position with `reason` (kill switch, shutdown).
    pub async fn exit_all(&mut self, state: &Arc<AppState>, reason: &str) {
        let active = state.trades.active_trades();
        if active.is_empty() {
            return;
        }
        warn!(reason, count = active.len(), "emergency exit of all positions");

        for trade in active {
            let remaining = trade.quantity - trade.exited_qty();
            match state.orders.place_exit(&trade.symbol, remaining).await {
                Ok(_) => {
                    self.finalize_close(
                        state,
                        &trade.id,
                        trade.current_price,
                        reason,
                        vec![reason.to_string()],
                    );
                }
                Err(e) => {
                    state.alerts.send_alert(
                        AlertSeverity::Critical,
                        AlertKind::SystemError,
                        "Emergency exit order failed",
                        &format!("{e:#}"),
                        Some(serde_json::json!({ "trade_id": trade.id })),
                    );
                }
            }
        }
    }

    /// All bookkeeping for a completed trade: registry, journal, risk,
    /// alerts, learning, exit-state cleanup.
    fn finalize_close(
        &mut self,
        state: &Arc<AppState>,
        trade_id: &str,
        exit_price: f64,
        reason: &str,
        exit_tags: Vec<String>,
    ) {
        let Some(trade) = state
            .trades
            .close_trade(trade_id, exit_price, reason, exit_tags)
        else {
            return;
        };

        if let Err(e) = state.journal.record(&trade) {
            warn!(error = %e, "failed to journal closed trade");
        }

        state.risk.record_trade_result(trade.pnl);
        state.risk.update_portfolio(state.trades.portfolio_greeks());

        let severity = if trade.pnl >= 0.0 {
            AlertSeverity::Info
        } else {
            AlertSeverity::Warning
        };
        state.alerts.send_alert(
            severity,
            AlertKind::TradeExit,
            &format!("Exit: {} ({:+.2})", trade.symbol, trade.pnl),
            &format!(
                "Closed {} @ {exit_price:.2} via {reason} | PnL {:+.2}",
                trade.symbol, trade.pnl
            ),
            Some(serde_json::json!({ "trade_id": trade.id, "reason": reason })),
        );

        // Final outcome into the learning layer, exactly once.
        let features = self.features_for(state, &trade);
        state.adaptive.write().record_trade_outcome(features);

        self.smart_exit.cleanup_trade(&trade.id);

        // Stop refreshing the leg if nothing else holds it.
        let still_used = state
            .trades
            .active_trades()
            .iter()
            .any(|t| t.symbol == trade.symbol);
        if !still_used {
            state.greeks_cache.untrack(&trade.symbol);
        }

        state.increment_version();
    }

    fn features_for(&mut self, state: &Arc<AppState>, trade: &Trade) -> TradeFeatures {
        let buckets = match self.entry_records.remove(&trade.id) {
            Some(record) => record.buckets,
            None => {
                // Trade predates this engine instance; rebuild from entry data.
                let ist_entry = trade.entry_time + chrono::Duration::minutes(330);
                crate::adaptive::buckets::extract(
                    ist_entry.hour() * 60 + ist_entry.minute(),
                    60.0,
                    trade.entry_gamma,
                    trade.entry_theta,
                    crate::smart_money::OiConviction::Medium,
                    trade.entry_iv,
                )
            }
        };

        let exit_time = trade.exit_time.unwrap_or_else(Utc::now);
        TradeFeatures {
            buckets,
            entry_delta: trade.entry_delta,
            entry_theta: trade.entry_theta,
            entry_gamma: trade.entry_gamma,
            exit_reason: trade
                .exit_reason
                .clone()
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            holding_minutes: (exit_time - trade.entry_time).num_minutes(),
            won: trade.pnl > 0.0,
            pnl: trade.pnl,
            timestamp: exit_time,
        }
    }
}

fn pct_change(current: f64, previous: f64) -> f64 {
    if previous <= 0.0 {
        0.0
    } else {
        (current - previous) / previous * 100.0
    }
}

// =============================================================================
// Tests
// =============================================================================
