//! Gas consumption log for diagnostic reports

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasLogEntry {
    pub msg: Value,
    pub gas_used: u64,
}

/// Summary over all recorded entries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasReport {
    pub max: GasLogEntry,
    pub average: f64,
    /// Descending by gas used
    pub sorted: Vec<GasLogEntry>,
}

/// Append-only gas log shared by everything in one run
#[derive(Debug, Clone, Default)]
pub struct GasLogger {
    entries: Arc<Mutex<Vec<GasLogEntry>>>,
}

impl GasLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, msg: &Value, gas_used: u64) {
        self.entries.lock().push(GasLogEntry {
            msg: msg.clone(),
            gas_used,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// `None` when nothing was recorded
    pub fn report(&self) -> Option<GasReport> {
        summarize(self.entries.lock().clone())
    }

    /// Take all entries, leaving the log empty
    pub fn drain(&self) -> Option<GasReport> {
        let entries = std::mem::take(&mut *self.entries.lock());
        summarize(entries)
    }
}

fn summarize(mut entries: Vec<GasLogEntry>) -> Option<GasReport> {
    if entries.is_empty() {
        return None;
    }

    let total: u128 = entries.iter().map(|e| e.gas_used as u128).sum();
    let average = total as f64 / entries.len() as f64;

    // stable sort keeps recording order among equal gas values
    entries.sort_by(|a, b| b.gas_used.cmp(&a.gas_used));
    let max = entries[0].clone();

    Some(GasReport {
        max,
        average,
        sorted: entries,
    })
}

impl fmt::Display for GasReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Gas consumption ({} calls)", self.sorted.len())?;
        writeln!(f, "  max:     {} {}", self.max.gas_used, self.max.msg)?;
        writeln!(f, "  average: {:.0}", self.average)?;
        for entry in &self.sorted {
            writeln!(f, "  {:>10}  {}", entry.gas_used, entry.msg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_log_has_no_report() {
        assert!(GasLogger::new().report().is_none());
    }

    #[test]
    fn test_report_max_average_sorted() {
        let log = GasLogger::new();
        log.record(&json!({ "open_position": {} }), 300);
        log.record(&json!({ "close_position": {} }), 100);
        log.record(&json!({ "liquidate": {} }), 500);
        log.record(&json!({ "pay_funding": {} }), 200);

        let report = log.report().unwrap();
        assert_eq!(report.max.gas_used, 500);
        assert_eq!(report.max.msg, json!({ "liquidate": {} }));
        assert_eq!(report.average, 275.0);
        let order: Vec<u64> = report.sorted.iter().map(|e| e.gas_used).collect();
        assert_eq!(order, vec![500, 300, 200, 100]);
    }

    #[test]
    fn test_clones_share_entries_and_drain_empties() {
        let log = GasLogger::new();
        let other = log.clone();
        other.record(&json!("a"), 10);
        log.record(&json!("b"), 20);

        assert_eq!(log.len(), 2);
        let report = log.drain().unwrap();
        assert_eq!(report.average, 15.0);
        assert!(other.is_empty());
    }

    #[test]
    fn test_display_lists_entries() {
        let log = GasLogger::new();
        log.record(&json!({ "set_open": { "open": true } }), 12_345);
        let text = log.report().unwrap().to_string();
        assert!(text.contains("12345"));
        assert!(text.contains("set_open"));
    }
}
