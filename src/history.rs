use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::{EngineError, Result};
use crate::model::{Blockchain, Transaction, TxStatus};

pub type AddressKey = (String, Blockchain);

/// How many trailing transactions are handed to the predictor.
const RECENT_LIMIT: usize = 32;

/// Per-address detector state: ordered transaction history, trailing value
/// statistics, and a ring of recent outgoing transfers for dispersion
/// checks. All mutation happens under the pipeline's per-address lock.
#[derive(Debug, Clone)]
pub struct AddressHistory {
    transactions: Vec<Transaction>,
    count: u64,
    mean: f64,
    m2: f64,
    outgoing: VecDeque<(DateTime<Utc>, f64)>,
    pub max_anomaly_score: f64,
    pub flagged: u64,
    pub last_touched: DateTime<Utc>,
}

impl AddressHistory {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            transactions: Vec::new(),
            count: 0,
            mean: 0.0,
            m2: 0.0,
            outgoing: VecDeque::new(),
            max_anomaly_score: 0.0,
            flagged: 0,
            last_touched: now,
        }
    }

    fn record(&mut self, tx: &Transaction, is_outgoing: bool, now: DateTime<Utc>) {
        self.transactions.push(tx.clone());
        self.last_touched = now;

        // Welford running mean/variance over observed values.
        self.count += 1;
        let delta = tx.value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (tx.value - self.mean);

        if is_outgoing {
            self.outgoing.push_back((tx.block_timestamp, tx.value));
            let cutoff = tx.block_timestamp - Duration::hours(24);
            while let Some(&(ts, _)) = self.outgoing.front() {
                if ts < cutoff {
                    self.outgoing.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// (count, mean, sample stddev) of all observed values.
    pub fn value_stats(&self) -> (u64, f64, f64) {
        let stddev = if self.count > 1 {
            (self.m2 / (self.count - 1) as f64).sqrt()
        } else {
            0.0
        };
        (self.count, self.mean, stddev)
    }

    /// Outgoing (timestamp, value) pairs within `window` of the most recent
    /// outgoing transfer.
    pub fn recent_outgoing(&self, window: Duration) -> Vec<(DateTime<Utc>, f64)> {
        let Some(&(latest, _)) = self.outgoing.back() else {
            return Vec::new();
        };
        let cutoff = latest - window;
        self.outgoing
            .iter()
            .filter(|(ts, _)| *ts >= cutoff)
            .copied()
            .collect()
    }

    /// Total outgoing value over the trailing 24 hours.
    pub fn trailing_outflow(&self) -> f64 {
        self.outgoing.iter().map(|(_, v)| v).sum()
    }

    pub fn recent_transactions(&self, limit: usize) -> Vec<Transaction> {
        let start = self.transactions.len().saturating_sub(limit);
        self.transactions[start..].to_vec()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Sender-side context captured while appending a transaction, consumed by
/// the classifier and the scorer. Statistics are the *prior* trailing
/// values, excluding the transaction being scored; the outgoing window and
/// recent sequence include it.
#[derive(Debug, Clone)]
pub struct IngestContext {
    pub prior_count: u64,
    pub prior_mean: f64,
    pub prior_stddev: f64,
    pub recent_outgoing: Vec<(DateTime<Utc>, f64)>,
    pub trailing_outflow: f64,
    pub recent_transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub enum Observation {
    /// First sighting; detection runs.
    New(IngestContext),
    /// A pending transaction reached its terminal status.
    Finalized,
    /// Already observed with the same status; absorbed.
    Duplicate,
}

/// Arena of per-address histories with idle eviction, plus a global index
/// of observed transaction ids enforcing the pending -> terminal rule.
pub struct HistoryStore {
    histories: DashMap<AddressKey, AddressHistory>,
    seen: DashMap<(Blockchain, String), TxStatus>,
    dispersion_window: Duration,
}

impl HistoryStore {
    pub fn new(dispersion_window_secs: u64) -> Self {
        Self {
            histories: DashMap::new(),
            seen: DashMap::new(),
            dispersion_window: Duration::seconds(dispersion_window_secs as i64),
        }
    }

    /// Append a transaction to the histories of both involved addresses.
    ///
    /// A transaction observed with a terminal status is immutable: a second
    /// sighting with a conflicting status is rejected, an identical one is
    /// absorbed. A pending transaction may be finalized exactly once.
    pub fn observe(&self, tx: &Transaction) -> Result<Observation> {
        let id_key = (tx.blockchain, tx.id.clone());
        if let Some(previous) = self.seen.get(&id_key).map(|s| *s) {
            if previous == tx.status {
                return Ok(Observation::Duplicate);
            }
            if previous.is_terminal() {
                return Err(EngineError::bad_transition(
                    previous.as_str(),
                    tx.status.as_str(),
                ));
            }
            // pending -> terminal: patch the stored copies in place.
            self.seen.insert(id_key, tx.status);
            self.finalize(&tx.from_address, tx);
            if !tx.is_self_transfer() {
                self.finalize(&tx.to_address, tx);
            }
            return Ok(Observation::Finalized);
        }
        self.seen.insert(id_key, tx.status);

        let now = Utc::now();
        let from_key = (tx.from_address.clone(), tx.blockchain);
        let mut sender = self
            .histories
            .entry(from_key)
            .or_insert_with(|| AddressHistory::new(now));
        let (prior_count, prior_mean, prior_stddev) = sender.value_stats();
        sender.record(tx, true, now);
        let ctx = IngestContext {
            prior_count,
            prior_mean,
            prior_stddev,
            recent_outgoing: sender.recent_outgoing(self.dispersion_window),
            trailing_outflow: sender.trailing_outflow(),
            recent_transactions: sender.recent_transactions(RECENT_LIMIT),
        };
        drop(sender);

        if !tx.is_self_transfer() {
            let to_key = (tx.to_address.clone(), tx.blockchain);
            self.histories
                .entry(to_key)
                .or_insert_with(|| AddressHistory::new(now))
                .record(tx, false, now);
        }

        Ok(Observation::New(ctx))
    }

    fn finalize(&self, address: &str, tx: &Transaction) {
        if let Some(mut history) = self
            .histories
            .get_mut(&(address.to_string(), tx.blockchain))
        {
            if let Some(stored) = history.transactions.iter_mut().find(|t| t.id == tx.id) {
                stored.status = tx.status;
                stored.block_number = tx.block_number;
            }
        }
    }

    /// Record that a detector flagged a transaction involving `address`,
    /// with the anomaly score when one was computed.
    pub fn note_detection(&self, address: &str, blockchain: Blockchain, score: Option<f64>) {
        if let Some(mut history) = self.histories.get_mut(&(address.to_string(), blockchain)) {
            history.flagged += 1;
            if let Some(score) = score {
                if score > history.max_anomaly_score {
                    history.max_anomaly_score = score;
                }
            }
        }
    }

    pub fn snapshot(&self, address: &str, blockchain: Blockchain) -> Option<AddressHistory> {
        self.histories
            .get(&(address.to_string(), blockchain))
            .map(|h| h.clone())
    }

    /// Drop per-address state idle longer than `retention`. Returns how
    /// many addresses were evicted.
    pub fn evict_idle(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.histories.len();
        self.histories
            .retain(|_, history| now - history.last_touched <= retention);
        before - self.histories.len()
    }

    pub fn tracked_addresses(&self) -> usize {
        self.histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(id: &str, from: &str, to: &str, value: f64, minutes: i64) -> Transaction {
        Transaction {
            id: id.into(),
            blockchain: Blockchain::Ethereum,
            tx_hash: format!("0x{id}"),
            from_address: from.into(),
            to_address: to.into(),
            value,
            fee: 0.001,
            status: TxStatus::Success,
            block_timestamp: DateTime::parse_from_rfc3339("2025-03-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc)
                + Duration::minutes(minutes),
            block_number: 100 + minutes as u64,
        }
    }

    #[test]
    fn welford_stats_match_naive() {
        let store = HistoryStore::new(3600);
        let values = [1.0, 2.0, 4.0, 8.0];
        for (i, v) in values.iter().enumerate() {
            store
                .observe(&tx(&format!("t{i}"), "a", "b", *v, i as i64))
                .unwrap();
        }
        let history = store.snapshot("a", Blockchain::Ethereum).unwrap();
        let (count, mean, stddev) = history.value_stats();
        assert_eq!(count, 4);
        assert!((mean - 3.75).abs() < 1e-9);
        // sample variance of [1,2,4,8] = 9.583333...
        assert!((stddev - 9.583333333333334f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn outgoing_ring_prunes_beyond_24h() {
        let store = HistoryStore::new(3600);
        store.observe(&tx("t0", "a", "b", 1.0, 0)).unwrap();
        store.observe(&tx("t1", "a", "b", 2.0, 25 * 60)).unwrap();
        let history = store.snapshot("a", Blockchain::Ethereum).unwrap();
        assert!((history.trailing_outflow() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn recent_outgoing_respects_window() {
        let store = HistoryStore::new(3600);
        store.observe(&tx("t0", "a", "b", 1.0, 0)).unwrap();
        store.observe(&tx("t1", "a", "b", 2.0, 90)).unwrap();
        let history = store.snapshot("a", Blockchain::Ethereum).unwrap();
        let recent = history.recent_outgoing(Duration::hours(1));
        assert_eq!(recent.len(), 1);
        assert!((recent[0].1 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn receiver_history_tracks_incoming() {
        let store = HistoryStore::new(3600);
        store.observe(&tx("t0", "a", "b", 1.5, 0)).unwrap();
        let history = store.snapshot("b", Blockchain::Ethereum).unwrap();
        assert_eq!(history.len(), 1);
        assert!((history.trailing_outflow() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn pending_finalizes_once() {
        let store = HistoryStore::new(3600);
        let mut pending = tx("t0", "a", "b", 1.0, 0);
        pending.status = TxStatus::Pending;
        assert!(matches!(
            store.observe(&pending).unwrap(),
            Observation::New(_)
        ));

        let done = tx("t0", "a", "b", 1.0, 0);
        assert!(matches!(
            store.observe(&done).unwrap(),
            Observation::Finalized
        ));
        let history = store.snapshot("a", Blockchain::Ethereum).unwrap();
        assert_eq!(history.transactions()[0].status, TxStatus::Success);

        // terminal status is immutable
        let mut failed = tx("t0", "a", "b", 1.0, 0);
        failed.status = TxStatus::Failed;
        assert!(matches!(
            store.observe(&failed),
            Err(EngineError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn identical_terminal_reingest_absorbed() {
        let store = HistoryStore::new(3600);
        store.observe(&tx("t0", "a", "b", 1.0, 0)).unwrap();
        assert!(matches!(
            store.observe(&tx("t0", "a", "b", 1.0, 0)).unwrap(),
            Observation::Duplicate
        ));
        assert_eq!(store.snapshot("a", Blockchain::Ethereum).unwrap().len(), 1);
    }

    #[test]
    fn idle_addresses_evicted() {
        let store = HistoryStore::new(3600);
        store.observe(&tx("t0", "a", "b", 1.0, 0)).unwrap();
        assert_eq!(store.tracked_addresses(), 2);

        let evicted = store.evict_idle(Utc::now() + Duration::days(8), Duration::days(7));
        assert_eq!(evicted, 2);
        assert_eq!(store.tracked_addresses(), 0);
    }
}
