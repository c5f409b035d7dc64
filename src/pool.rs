use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::account::Account;

/// Ordered account collection with a round-robin rotation cursor.
///
/// Selection filters are supplied per call; the pool itself only enforces
/// activation state and reactivation deadlines.
pub struct Pool {
    accounts: RwLock<Vec<Arc<Account>>>,
    cursor: Mutex<usize>,
}

impl Pool {
    pub fn new(accounts: Vec<Arc<Account>>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
            cursor: Mutex::new(0),
        }
    }

    pub fn add(&self, account: Arc<Account>) {
        self.accounts.write().push(account);
    }

    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }

    pub fn accounts(&self) -> Vec<Arc<Account>> {
        self.accounts.read().clone()
    }

    /// Advances the rotation cursor and returns the first account that is
    /// active (restoring elapsed soft deactivations on the way) and passes
    /// the filter. `None` means a full pass found nothing.
    pub fn next<F>(&self, filter: F) -> Option<Arc<Account>>
    where
        F: Fn(&Account) -> bool,
    {
        let accounts = self.accounts.read();
        let n = accounts.len();
        if n == 0 {
            return None;
        }
        let now = SystemTime::now();
        let mut cursor = self.cursor.lock();
        for i in 0..n {
            let idx = (*cursor + i) % n;
            let account = &accounts[idx];
            if account.selectable(now) && filter(account) {
                *cursor = (idx + 1) % n;
                return Some(account.clone());
            }
        }
        None
    }

    /// Like [`next`](Self::next), but when no account currently qualifies,
    /// sleeps until the soonest account could become eligible for
    /// `endpoint`, up to `max_wait`. Dropping the future cancels the wait.
    pub async fn next_with_wait<F>(
        &self,
        filter: F,
        endpoint: &str,
        max_wait: Duration,
    ) -> Option<Arc<Account>>
    where
        F: Fn(&Account) -> bool,
    {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            if let Some(account) = self.next(&filter) {
                return Some(account);
            }

            let now = SystemTime::now();
            let soonest = self
                .accounts
                .read()
                .iter()
                .filter_map(|a| a.eligible_at(endpoint, now))
                .min()?;

            let wait = soonest
                .duration_since(now)
                .unwrap_or(Duration::from_millis(100))
                .max(Duration::from_millis(100));
            let wake = tokio::time::Instant::now() + wait;

            if wake >= deadline {
                debug!(endpoint, "pool wait would exceed deadline, waiting out remainder");
                tokio::time::sleep_until(deadline).await;
                return self.next(&filter);
            }
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Temporarily removes the account from rotation; it rejoins
    /// automatically once the cooldown elapses.
    pub fn soft_deactivate(&self, account: &Account, cooldown: Duration) {
        warn!(
            user = %account.username,
            cooldown_secs = cooldown.as_secs(),
            "soft-deactivating account"
        );
        account.soft_deactivate(cooldown);
    }

    /// Permanently removes the account from rotation until external
    /// intervention.
    pub fn deactivate(&self, account: &Account) {
        warn!(user = %account.username, "permanently deactivating account");
        account.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(names: &[&str]) -> Pool {
        Pool::new(
            names
                .iter()
                .map(|n| Arc::new(Account::new(*n, "pw")))
                .collect(),
        )
    }

    #[test]
    fn next_rotates_round_robin() {
        let pool = pool_of(&["a", "b", "c"]);
        let picks: Vec<String> = (0..4)
            .map(|_| pool.next(|_| true).unwrap().username.clone())
            .collect();
        assert_eq!(picks, ["a", "b", "c", "a"]);
    }

    #[test]
    fn next_skips_filtered_accounts() {
        let pool = pool_of(&["a", "b"]);
        let pick = pool.next(|acc| acc.username != "a").unwrap();
        assert_eq!(pick.username, "b");
    }

    #[test]
    fn next_signals_exhaustion() {
        let pool = pool_of(&["a"]);
        assert!(pool.next(|_| false).is_none());
        assert!(pool_of(&[]).next(|_| true).is_none());
    }

    #[test]
    fn deactivated_accounts_are_never_selected() {
        let pool = pool_of(&["a", "b"]);
        let a = pool.accounts()[0].clone();
        pool.deactivate(&a);
        for _ in 0..4 {
            assert_eq!(pool.next(|_| true).unwrap().username, "b");
        }
    }

    #[test]
    fn soft_deactivated_account_rejoins_after_cooldown() {
        let pool = pool_of(&["a"]);
        let a = pool.accounts()[0].clone();
        pool.soft_deactivate(&a, Duration::from_millis(20));
        assert!(pool.next(|_| true).is_none());
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(pool.next(|_| true).unwrap().username, "a");
    }

    #[tokio::test]
    async fn next_with_wait_returns_once_account_reactivates() {
        let pool = pool_of(&["a"]);
        let a = pool.accounts()[0].clone();
        pool.soft_deactivate(&a, Duration::from_millis(150));
        let picked = pool
            .next_with_wait(|_| true, "UserByScreenName", Duration::from_secs(5))
            .await;
        assert_eq!(picked.unwrap().username, "a");
    }

    #[tokio::test]
    async fn next_with_wait_gives_up_on_permanent_deactivation() {
        let pool = pool_of(&["a"]);
        let a = pool.accounts()[0].clone();
        pool.deactivate(&a);
        let picked = pool
            .next_with_wait(|_| true, "UserByScreenName", Duration::from_millis(200))
            .await;
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn next_with_wait_respects_deadline() {
        let pool = pool_of(&["a"]);
        let a = pool.accounts()[0].clone();
        pool.soft_deactivate(&a, Duration::from_secs(60));
        let start = std::time::Instant::now();
        let picked = pool
            .next_with_wait(|_| true, "UserByScreenName", Duration::from_millis(250))
            .await;
        assert!(picked.is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
