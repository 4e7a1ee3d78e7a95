// =============================================================================
// Trade Journal — line-oriented daily records
// =============================================================================
//
// One JSONL file per trading day under logs/journal/. Appends only; each
// line is a complete closed trade so the file replays cleanly into the
// analytics tooling.
// =============================================================================

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

use crate::trade_manager::Trade;

pub struct TradeJournal {
    dir: PathBuf,
}

impl TradeJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn default_dir() -> PathBuf {
        PathBuf::from("logs/journal")
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("trades_{}.jsonl", date.format("%Y%m%d")))
    }

    /// Append one closed trade to today's journal file.
    pub fn record(&self, trade: &Trade) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create journal dir {}", self.dir.display()))?;

        let path = self.day_file(Utc::now().date_naive());
        let line = serde_json::to_string(trade).context("failed to serialise trade")?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to {}", path.display()))?;

        debug!(id = %trade.id, path = %path.display(), "trade journaled");
        Ok(())
    }

    /// Load a day's journal, skipping lines that no longer parse.
    pub fn read_day(&self, date: NaiveDate) -> Vec<Trade> {
        let path = self.day_file(date);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Vec::new();
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(trade) => Some(trade),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping bad journal line");
                    None
                }
            })
            .collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade_manager::{TradeManager, TradeOpen};
    use crate::types::OptionType;

    fn closed_trade() -> Trade {
        let manager = TradeManager::new();
        let id = manager.open_trade(TradeOpen {
            underlying: "NIFTY".into(),
            symbol: "NIFTY07AUG2519500CE".into(),
            expiry: NaiveDate::from_ymd_opt(2025, 8, 7).unwrap(),
            strike: 19500,
            option_type: OptionType::CE,
            quantity: 225,
            entry_price: 101.0,
            entry_delta: 0.55,
            entry_gamma: 0.004,
            entry_theta: -8.0,
            entry_iv: 22.0,
            sl_price: 93.93,
            target_price: 108.07,
            entry_reason_tags: vec!["ltp_rising".into()],
            entry_order_id: "O-1".into(),
        });
        manager
            .close_trade(&id, 108.10, "PROFIT_TARGET", vec!["profit_target".into()])
            .unwrap()
    }

    fn temp_journal() -> TradeJournal {
        let dir = std::env::temp_dir().join(format!("meridian_journal_{}", uuid::Uuid::new_v4()));
        TradeJournal::new(dir)
    }

    #[test]
    fn record_and_replay_round_trip() {
        let journal = temp_journal();
        let trade = closed_trade();

        journal.record(&trade).unwrap();
        journal.record(&trade).unwrap();

        let today = Utc::now().date_naive();
        let replayed = journal.read_day(today);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].id, trade.id);
        assert!((replayed[0].pnl - trade.pnl).abs() < 1e-9);

        std::fs::remove_dir_all(journal.dir()).ok();
    }

    #[test]
    fn missing_day_reads_empty() {
        let journal = temp_journal();
        let replayed = journal.read_day(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert!(replayed.is_empty());
    }

    #[test]
    fn bad_lines_are_skipped() {
        let journal = temp_journal();
        let trade = closed_trade();
        journal.record(&trade).unwrap();

        // Corrupt the file with a stray line.
        let today = Utc::now().date_naive();
        let path = journal.day_file(today);
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("not json\n");
        std::fs::write(&path, content).unwrap();

        let replayed = journal.read_day(today);
        assert_eq!(replayed.len(), 1);

        std::fs::remove_dir_all(journal.dir()).ok();
    }
}
