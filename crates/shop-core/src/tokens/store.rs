//! # Ephemeral Token Store
//!
//! Generic in-memory map of opaque token ids to expiring, usage-capped
//! records. Both CSRF and download tokens live in one of these.
//!
//! Every check-then-mutate runs inside a single critical section of a
//! synchronous mutex and never awaits while holding it, so operations on the
//! same id are linearizable: N uses are N uses, even under concurrent
//! redemption.
//!
//! Consumption comes in two shapes:
//!
//! ```text
//!   consume(id)                      one step: check + decrement
//!
//!   reserve(id) ──► transfer ──┬──► commit(id)    decrement
//!                              └──► release(id)   unchanged
//! ```

use crate::clock::SharedClock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::error::TokenError;

/// Bytes of CSPRNG output behind every token id (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Generate a fresh unguessable token id (64 hex chars)
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Short, log-safe prefix of a token id
pub fn redact(token_id: &str) -> String {
    let prefix: String = token_id.chars().take(8).collect();
    format!("{}…", prefix)
}

#[derive(Debug, Clone)]
struct TokenRecord<P> {
    payload: P,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    uses_remaining: u32,
    /// Uses reserved by transfers that have not finished yet
    in_flight: u32,
}

impl<P> TokenRecord<P> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn available(&self) -> u32 {
        self.uses_remaining.saturating_sub(self.in_flight)
    }
}

/// Read-only view of a live record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSnapshot<P> {
    pub payload: P,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub uses_remaining: u32,
    pub in_flight: u32,
}

/// What a check decided to do with a record.
enum Verdict {
    Usable,
    /// Invalid for good; drop the record (and optionally leave an
    /// exhaustion marker behind).
    Remove(TokenError),
    /// Invalid right now but other transfers still hold reservations.
    Reject(TokenError),
}

struct Entries<P> {
    live: HashMap<String, TokenRecord<P>>,
    /// Ids spent to zero uses, with their original expiry. Markers are never
    /// consumable; they only turn a later attempt into `Exhausted` instead of
    /// `NotFound`.
    exhausted: HashMap<String, DateTime<Utc>>,
}

impl<P> Entries<P> {
    fn new() -> Self {
        Self {
            live: HashMap::new(),
            exhausted: HashMap::new(),
        }
    }

    fn judge(&self, id: &str, now: DateTime<Utc>) -> Result<Verdict, TokenError> {
        let Some(record) = self.live.get(id) else {
            return Err(self.missing(id, now));
        };

        if record.is_expired(now) {
            return Ok(Verdict::Remove(TokenError::Expired));
        }
        if record.uses_remaining == 0 {
            return Ok(Verdict::Remove(TokenError::Exhausted));
        }
        if record.available() == 0 {
            return Ok(Verdict::Reject(TokenError::Exhausted));
        }
        Ok(Verdict::Usable)
    }

    fn missing(&self, id: &str, now: DateTime<Utc>) -> TokenError {
        match self.exhausted.get(id) {
            Some(expires_at) if now < *expires_at => TokenError::Exhausted,
            _ => TokenError::NotFound,
        }
    }

    /// Apply a non-usable verdict and return the error to report.
    fn settle(&mut self, id: &str, verdict: Verdict) -> Option<TokenError> {
        match verdict {
            Verdict::Usable => None,
            Verdict::Reject(err) => Some(err),
            Verdict::Remove(err) => {
                if err == TokenError::Exhausted {
                    self.retire(id);
                } else {
                    self.live.remove(id);
                }
                Some(err)
            }
        }
    }

    fn retire(&mut self, id: &str) {
        if let Some(record) = self.live.remove(id) {
            self.exhausted.insert(id.to_string(), record.expires_at);
        }
    }

    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.live.len();
        self.live.retain(|_, record| !record.is_expired(now));
        self.exhausted.retain(|_, expires_at| now < *expires_at);
        before - self.live.len()
    }
}

/// Aborts the sweep task once the last store handle goes away.
#[derive(Default)]
struct Sweeper(Mutex<Option<JoinHandle<()>>>);

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.0.get_mut().take() {
            handle.abort();
        }
    }
}

/// Generic expiring, usage-capped token store.
///
/// Cloning is cheap and every clone shares the same map.
pub struct TokenStore<P> {
    kind: &'static str,
    entries: Arc<Mutex<Entries<P>>>,
    clock: SharedClock,
    sweeper: Arc<Sweeper>,
}

impl<P> Clone for TokenStore<P> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: Arc::clone(&self.entries),
            clock: Arc::clone(&self.clock),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

impl<P> std::fmt::Debug for TokenStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("kind", &self.kind)
            .field("live", &self.len())
            .field("sweeping", &self.is_running())
            .finish()
    }
}

impl<P: Clone> TokenStore<P> {
    /// Create an empty store. `kind` only labels log lines.
    pub fn new(kind: &'static str, clock: SharedClock) -> Self {
        Self {
            kind,
            entries: Arc::new(Mutex::new(Entries::new())),
            clock,
            sweeper: Arc::new(Sweeper::default()),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Insert a fresh token valid for `ttl` and at most `max_uses` uses.
    pub fn issue(&self, ttl: Duration, max_uses: u32, payload: P) -> String {
        let now = self.clock.now();
        let record = TokenRecord {
            payload,
            created_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            uses_remaining: max_uses,
            in_flight: 0,
        };

        let mut entries = self.entries.lock();
        let id = loop {
            let candidate = generate_token_id();
            if !entries.live.contains_key(&candidate) {
                break candidate;
            }
        };
        entries.live.insert(id.clone(), record);
        id
    }

    /// Spend one use and return the payload.
    ///
    /// Expired and exhausted records are removed as a side effect.
    pub fn consume(&self, id: &str) -> Result<P, TokenError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let verdict = entries.judge(id, now)?;
        if let Some(err) = entries.settle(id, verdict) {
            return Err(err);
        }

        let Some(record) = entries.live.get_mut(id) else {
            return Err(TokenError::NotFound);
        };
        record.uses_remaining -= 1;
        if record.uses_remaining > 0 {
            return Ok(record.payload.clone());
        }

        let payload = record.payload.clone();
        entries.retire(id);
        Ok(payload)
    }

    /// Validity check that spends nothing.
    pub fn peek(&self, id: &str) -> Result<P, TokenError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let verdict = entries.judge(id, now)?;
        if let Some(err) = entries.settle(id, verdict) {
            return Err(err);
        }
        entries
            .live
            .get(id)
            .map(|record| record.payload.clone())
            .ok_or(TokenError::NotFound)
    }

    /// First phase of a two-phase use: hold one use without spending it.
    pub fn reserve(&self, id: &str) -> Result<P, TokenError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let verdict = entries.judge(id, now)?;
        if let Some(err) = entries.settle(id, verdict) {
            return Err(err);
        }

        let record = entries.live.get_mut(id).ok_or(TokenError::NotFound)?;
        record.in_flight += 1;
        Ok(record.payload.clone())
    }

    /// Turn a reservation into a spent use. Returns the uses left.
    ///
    /// Expiry is not re-checked: a transfer that started on a valid token
    /// is allowed to finish.
    pub fn commit(&self, id: &str) -> Result<u32, TokenError> {
        let mut entries = self.entries.lock();

        let record = entries.live.get_mut(id).ok_or(TokenError::NotFound)?;
        record.in_flight = record.in_flight.saturating_sub(1);
        record.uses_remaining = record.uses_remaining.saturating_sub(1);
        let remaining = record.uses_remaining;

        if remaining == 0 && record.in_flight == 0 {
            entries.retire(id);
        }
        Ok(remaining)
    }

    /// Give a reservation back unchanged.
    pub fn release(&self, id: &str) {
        if let Some(record) = self.entries.lock().live.get_mut(id) {
            record.in_flight = record.in_flight.saturating_sub(1);
        }
    }

    /// Raw lookup of a live record, valid or not.
    pub fn lookup(&self, id: &str) -> Result<TokenSnapshot<P>, TokenError> {
        self.entries
            .lock()
            .live
            .get(id)
            .map(|record| TokenSnapshot {
                payload: record.payload.clone(),
                created_at: record.created_at,
                expires_at: record.expires_at,
                uses_remaining: record.uses_remaining,
                in_flight: record.in_flight,
            })
            .ok_or(TokenError::NotFound)
    }

    /// Remove every expired record. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.entries.lock().sweep(now)
    }
}

impl<P> TokenStore<P> {
    pub fn len(&self) -> usize {
        self.entries.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().live.contains_key(id)
    }

    /// Whether the background sweep is scheduled
    pub fn is_running(&self) -> bool {
        self.sweeper
            .0
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the background sweep. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.sweeper.0.lock().take() {
            handle.abort();
            info!(kind = self.kind, "Token sweep stopped");
        }
    }
}

impl<P: Send + 'static> TokenStore<P> {
    /// Schedule `sweep_expired` every `every` on the current tokio runtime.
    ///
    /// One task per store; calling `start` while running is a no-op, so two
    /// sweeps never overlap.
    pub fn start(&self, every: std::time::Duration) {
        let mut slot = self.sweeper.0.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let every = every.max(std::time::Duration::from_millis(1));
        let entries = Arc::clone(&self.entries);
        let clock = Arc::clone(&self.clock);
        let kind = self.kind;

        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = entries.lock().sweep(clock.now());
                if removed > 0 {
                    debug!(kind, removed, "Swept expired tokens");
                }
            }
        }));

        info!(kind, interval_secs = every.as_secs(), "Token sweep started");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    fn manual_store() -> (Arc<ManualClock>, TokenStore<u32>) {
        let clock = Arc::new(ManualClock::starting_now());
        let store = TokenStore::new("test", clock.clone());
        (clock, store)
    }

    #[test]
    fn test_token_ids_are_long_and_distinct() {
        let (_, store) = manual_store();
        let a = store.issue(Duration::hours(1), 1, 0);
        let b = store.issue(Duration::hours(1), 1, 0);

        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_unrepresentable_ttl_saturates() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::days(365 * 1_000_000), 1, 7);

        let snapshot = store.lookup(&id).unwrap();
        assert_eq!(snapshot.expires_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(store.consume(&id), Ok(7));
    }

    #[test]
    fn test_exactly_n_uses() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 3, 42);

        for _ in 0..3 {
            assert_eq!(store.consume(&id), Ok(42));
        }
        assert_eq!(store.consume(&id), Err(TokenError::Exhausted));
    }

    #[test]
    fn test_exhausted_token_is_removed() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 1, 7);

        assert_eq!(store.consume(&id), Ok(7));

        assert!(!store.contains(&id));
        assert!(store.is_empty());
        assert_eq!(store.lookup(&id), Err(TokenError::NotFound));
    }

    #[test]
    fn test_unknown_token_not_found() {
        let (_, store) = manual_store();
        assert_eq!(store.consume("deadbeef"), Err(TokenError::NotFound));
        assert_eq!(store.peek("ünïcödé-garbage"), Err(TokenError::NotFound));
    }

    #[test]
    fn test_expiry_boundary() {
        let (clock, store) = manual_store();
        let ttl = Duration::minutes(15);

        let before = store.issue(ttl, 1, 1);
        let exact = store.issue(ttl, 1, 2);
        let after = store.issue(ttl, 1, 3);

        clock.advance(ttl - Duration::milliseconds(1));
        assert_eq!(store.consume(&before), Ok(1));

        clock.advance(Duration::milliseconds(1));
        assert_eq!(store.consume(&exact), Err(TokenError::Expired));

        clock.advance(Duration::milliseconds(1));
        assert_eq!(store.consume(&after), Err(TokenError::Expired));
    }

    #[test]
    fn test_expired_token_removed_on_consume() {
        let (clock, store) = manual_store();
        let id = store.issue(Duration::seconds(1), 5, 0);

        clock.advance(Duration::seconds(2));

        assert_eq!(store.consume(&id), Err(TokenError::Expired));
        assert!(!store.contains(&id));
        assert_eq!(store.consume(&id), Err(TokenError::NotFound));
    }

    #[test]
    fn test_zero_use_token_is_exhausted() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 0, 0);

        assert_eq!(store.consume(&id), Err(TokenError::Exhausted));
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_peek_does_not_spend() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 1, 9);

        assert_eq!(store.peek(&id), Ok(9));
        assert_eq!(store.peek(&id), Ok(9));
        assert_eq!(store.consume(&id), Ok(9));
    }

    #[test]
    fn test_reserve_release_keeps_count() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 2, 0);

        store.reserve(&id).unwrap();
        assert_eq!(store.lookup(&id).unwrap().in_flight, 1);

        store.release(&id);
        let snapshot = store.lookup(&id).unwrap();
        assert_eq!(snapshot.uses_remaining, 2);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[test]
    fn test_reserve_commit_decrements_once() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 2, 0);

        store.reserve(&id).unwrap();
        assert_eq!(store.commit(&id), Ok(1));
        assert_eq!(store.lookup(&id).unwrap().uses_remaining, 1);
    }

    #[test]
    fn test_reservations_cap_concurrent_holders() {
        let (_, store) = manual_store();
        let id = store.issue(Duration::hours(1), 1, 0);

        assert!(store.reserve(&id).is_ok());
        assert_eq!(store.reserve(&id), Err(TokenError::Exhausted));

        // The held use is still there until its transfer settles.
        assert!(store.contains(&id));
        assert_eq!(store.commit(&id), Ok(0));
        assert!(!store.contains(&id));
    }

    #[test]
    fn test_commit_after_sweep_is_not_found() {
        let (clock, store) = manual_store();
        let id = store.issue(Duration::seconds(1), 1, 0);

        store.reserve(&id).unwrap();
        clock.advance(Duration::seconds(5));
        store.sweep_expired();

        assert_eq!(store.commit(&id), Err(TokenError::NotFound));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (clock, store) = manual_store();
        for _ in 0..3 {
            store.issue(Duration::milliseconds(1), 1, 0);
        }
        let keep = store.issue(Duration::hours(1), 1, 0);

        clock.advance(Duration::milliseconds(5));

        assert_eq!(store.sweep_expired(), 3);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&keep));
    }

    #[test]
    fn test_sweep_leaves_fresh_tokens() {
        let (_, store) = manual_store();
        for _ in 0..3 {
            store.issue(Duration::hours(1), 1, 0);
        }

        assert_eq!(store.sweep_expired(), 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_exhaustion_marker_expires_with_token() {
        let (clock, store) = manual_store();
        let id = store.issue(Duration::hours(1), 1, 0);
        store.consume(&id).unwrap();

        assert_eq!(store.consume(&id), Err(TokenError::Exhausted));

        clock.advance(Duration::hours(2));
        store.sweep_expired();
        assert_eq!(store.consume(&id), Err(TokenError::NotFound));
    }

    #[test]
    fn test_concurrent_consume_exact_count() {
        let store: TokenStore<u32> = TokenStore::new("race", Arc::new(SystemClock));
        let id = store.issue(Duration::hours(1), 5, 0);

        let successes: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| store.consume(&id).is_ok()))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(false))
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(successes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_lifecycle() {
        let store: TokenStore<u32> = TokenStore::new("timer", Arc::new(SystemClock));
        store.issue(Duration::milliseconds(1), 1, 0);

        store.start(std::time::Duration::from_secs(300));
        store.start(std::time::Duration::from_secs(300));
        assert!(store.is_running());

        store.stop();
        assert!(!store.is_running());
    }

    #[tokio::test]
    async fn test_background_sweep_removes_expired() {
        let store: TokenStore<u32> = TokenStore::new("timer", Arc::new(SystemClock));
        for _ in 0..3 {
            store.issue(Duration::milliseconds(1), 1, 0);
        }

        store.start(std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert_eq!(store.len(), 0);
        store.stop();
    }
}
