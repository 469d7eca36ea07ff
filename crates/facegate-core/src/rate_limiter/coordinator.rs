use super::{CoordinatorStats, RateLedger, RateLimiter, Reservation};
use crate::error::{FaceResult, FaceServiceError, Resource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Messages applied, in arrival order, to the coordinator's ledger.
enum CoordinatorRequest {
    Reserve {
        count: u32,
        reply: oneshot::Sender<Reservation>,
    },
    Throttle {
        extra: Duration,
        reply: oneshot::Sender<()>,
    },
    Stats {
        reply: oneshot::Sender<CoordinatorStats>,
    },
}

/// Clone-safe handle to one account's coordinator task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    account: Arc<str>,
    tx: mpsc::Sender<CoordinatorRequest>,
}

impl CoordinatorHandle {
    pub fn account(&self) -> &str {
        &self.account
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorRequest) -> FaceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| self.stopped())?;
        reply_rx.await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> FaceServiceError {
        FaceServiceError::Custom(format!("rate limit coordinator for {} stopped", self.account))
    }

    pub async fn stats(&self) -> FaceResult<CoordinatorStats> {
        self.request(|reply| CoordinatorRequest::Stats { reply }).await
    }
}

#[async_trait]
impl RateLimiter for CoordinatorHandle {
    async fn reserve_batch(&self, count: u32) -> FaceResult<Reservation> {
        self.request(|reply| CoordinatorRequest::Reserve { count, reply }).await
    }

    async fn report_throttle(&self, extra: Duration) -> FaceResult<()> {
        self.request(|reply| CoordinatorRequest::Throttle { extra, reply }).await
    }
}

/// Spawn the single-writer coordinator for `account` on the current runtime.
///
/// The task owns its ledger outright and exits once every handle is dropped.
pub fn spawn_coordinator(account: &str, tps: f64) -> CoordinatorHandle {
    let (tx, mut rx) = mpsc::channel::<CoordinatorRequest>(256);
    let mut ledger = RateLedger::for_tps(tps);
    let account: Arc<str> = Arc::from(account);

    tracing::info!(
        account = %account,
        tps,
        interval_ms = ledger.interval_ms(),
        "rate limit coordinator started"
    );

    let task_account = account.clone();
    tokio::spawn(async move {
        let epoch = Instant::now();
        let now_ms = || epoch.elapsed().as_millis() as u64;

        while let Some(req) = rx.recv().await {
            match req {
                CoordinatorRequest::Reserve { count, reply } => {
                    let reservation = ledger.reserve(now_ms(), count);
                    tracing::trace!(count, delay_ms = reservation.delay.as_millis() as u64, "slots reserved");
                    let _ = reply.send(reservation);
                }
                CoordinatorRequest::Throttle { extra, reply } => {
                    ledger.throttle(now_ms(), extra.as_millis() as u64);
                    tracing::warn!(
                        account = %task_account,
                        extra_ms = extra.as_millis() as u64,
                        "provider throttled; extending reservation window"
                    );
                    let _ = reply.send(());
                }
                CoordinatorRequest::Stats { reply } => {
                    let _ = reply.send(ledger.stats(now_ms()));
                }
            }
        }
        tracing::info!(account = %task_account, "rate limit coordinator exiting");
    });

    CoordinatorHandle { account, tx }
}

/// Longest account name the registry accepts.
pub const MAX_ACCOUNT_LEN: usize = 128;

/// One coordinator per provider account, created on first use.
///
/// Every coordinator owns a task for the life of the process, so the number of
/// accounts is capped at `max_accounts`.
pub struct CoordinatorRegistry {
    tps: f64,
    max_accounts: usize,
    coordinators: Mutex<HashMap<String, CoordinatorHandle>>,
}

impl CoordinatorRegistry {
    pub fn new(tps: f64, max_accounts: usize) -> Self {
        Self {
            tps,
            max_accounts,
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    pub fn tps(&self) -> f64 {
        self.tps
    }

    pub fn max_accounts(&self) -> usize {
        self.max_accounts
    }

    /// The coordinator for `account`, spawning it if needed.
    pub fn get(&self, account: &str) -> FaceResult<CoordinatorHandle> {
        validate_account(account)?;
        let mut map = self.coordinators.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = map.get(account) {
            return Ok(handle.clone());
        }
        if map.len() >= self.max_accounts {
            tracing::warn!(account, max_accounts = self.max_accounts, "coordinator registry full");
            return Err(FaceServiceError::invalid(
                "account",
                format!("coordinator already tracks {} accounts", self.max_accounts),
            ));
        }
        let handle = spawn_coordinator(account, self.tps);
        map.insert(account.to_string(), handle.clone());
        Ok(handle)
    }

    /// The coordinator for `account` if one has been spawned.
    pub fn lookup(&self, account: &str) -> FaceResult<CoordinatorHandle> {
        let map = self.coordinators.lock().unwrap_or_else(|e| e.into_inner());
        map.get(account).cloned().ok_or_else(|| FaceServiceError::NotFound {
            resource: Resource::Account,
            id: account.to_string(),
        })
    }

    pub fn accounts(&self) -> Vec<String> {
        let map = self.coordinators.lock().unwrap_or_else(|e| e.into_inner());
        let mut accounts: Vec<String> = map.keys().cloned().collect();
        accounts.sort();
        accounts
    }
}

fn validate_account(account: &str) -> FaceResult<()> {
    if account.is_empty() {
        return Err(FaceServiceError::invalid("account", "must not be empty"));
    }
    if account.len() > MAX_ACCOUNT_LEN {
        return Err(FaceServiceError::invalid(
            "account",
            format!("longer than {MAX_ACCOUNT_LEN} bytes"),
        ));
    }
    if account.chars().any(char::is_control) {
        return Err(FaceServiceError::invalid("account", "contains control characters"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_cold_then_queued_reservation() {
        let limiter = spawn_coordinator("acct", 30.0);
        let interval = Duration::from_millis(38);

        let first = limiter.reserve_batch(5).await.unwrap();
        assert_eq!(first.delay, Duration::ZERO);
        assert_eq!(first.interval, interval);

        let second = limiter.reserve_batch(5).await.unwrap();
        let expected = interval * 5;
        let diff = second.delay.abs_diff(expected);
        assert!(diff <= Duration::from_millis(50), "delay {:?}", second.delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_delays_next_reservation() {
        let limiter = spawn_coordinator("acct", 30.0);
        limiter.report_throttle(Duration::from_millis(2_000)).await.unwrap();
        let r = limiter.reserve_batch(1).await.unwrap();
        assert!(r.delay >= Duration::from_millis(2_000), "delay {:?}", r.delay);

        let stats = limiter.stats().await.unwrap();
        assert_eq!(stats.throttle_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_drains_with_time() {
        let limiter = spawn_coordinator("acct", 10.0); // 112ms interval
        limiter.reserve_batch(10).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(limiter.reserve_batch(1).await.unwrap().delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_get_distinct_slots() {
        let limiter = spawn_coordinator("acct", 30.0);
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let l = limiter.clone();
            tasks.push(tokio::spawn(async move { l.reserve_batch(1).await.unwrap().delay }));
        }
        let mut delays = Vec::new();
        for t in tasks {
            delays.push(t.await.unwrap().as_millis() as u64);
        }
        delays.sort_unstable();
        let expected: Vec<u64> = (0..20).map(|i| i * 38).collect();
        assert_eq!(delays, expected);
    }

    #[tokio::test]
    async fn test_registry_shares_one_ledger_per_account() {
        let registry = CoordinatorRegistry::new(30.0, 8);
        registry.get("a").unwrap().reserve_batch(3).await.unwrap();
        let again = registry.get("a").unwrap().reserve_batch(1).await.unwrap();
        assert!(again.delay > Duration::ZERO);

        let other = registry.get("b").unwrap().reserve_batch(1).await.unwrap();
        assert_eq!(other.delay, Duration::ZERO);
        assert_eq!(registry.accounts(), ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_refuses_accounts_past_the_cap() {
        let registry = CoordinatorRegistry::new(30.0, 2);
        registry.get("a").unwrap();
        registry.get("b").unwrap();

        let err = registry.get("c").unwrap_err();
        assert!(matches!(err, FaceServiceError::InvalidInput { field: "account", .. }));
        assert_eq!(registry.accounts(), ["a", "b"]);

        // Known accounts keep working once the registry is full.
        let r = registry.get("a").unwrap().reserve_batch(1).await.unwrap();
        assert_eq!(r.delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_rejects_bad_account_names() {
        let registry = CoordinatorRegistry::new(30.0, 8);
        assert!(registry.get("").is_err());
        assert!(registry.get(&"x".repeat(MAX_ACCOUNT_LEN + 1)).is_err());
        assert!(registry.get("bad\nname").is_err());
        assert!(registry.get(&"x".repeat(MAX_ACCOUNT_LEN)).is_ok());
        assert_eq!(registry.accounts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_never_spawns() {
        let registry = CoordinatorRegistry::new(30.0, 8);
        let err = registry.lookup("ghost").unwrap_err();
        assert!(matches!(
            err,
            FaceServiceError::NotFound {
                resource: Resource::Account,
                ..
            }
        ));
        assert!(registry.accounts().is_empty());

        registry.get("ghost").unwrap();
        assert!(registry.lookup("ghost").is_ok());
    }
}
