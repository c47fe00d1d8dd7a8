use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::session::AuthSession;

/// Configuration for the session refresher
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// How often the remaining lifetime is checked
    pub check_interval: Duration,
    /// Re-authenticate when less than this is left
    pub threshold: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            threshold: Duration::from_secs(5 * 60),
        }
    }
}

/// Result of a single refresh check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// No session to refresh; the next API call authenticates on demand.
    NotAuthenticated,
    /// Enough lifetime left, or no known expiry.
    NotNeeded,
    Refreshed,
    /// Refresh failed; the session is left as it was.
    Failed(String),
}

/// Background task that re-authenticates shortly before the access credential expires.
#[derive(Debug)]
pub struct SessionRefresher {
    session: Arc<AuthSession>,
    config: RefreshConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRefresher {
    pub fn new(session: Arc<AuthSession>, config: RefreshConfig) -> Self {
        Self {
            session,
            config,
            task: Mutex::new(None),
        }
    }

    /// Run one check now.
    pub async fn check_once(&self) -> RefreshOutcome {
        check(&self.session, self.config.threshold).await
    }

    /// Spawn the periodic check. Calling it while already running is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Session refresher already running");
            return;
        }

        let session = Arc::clone(&self.session);
        let config = self.config.clone();
        debug!(
            "Starting session refresher with interval of {} seconds",
            config.check_interval.as_secs()
        );

        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(config.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await; // First tick completes immediately

            loop {
                ticker.tick().await;
                check(&session, config.threshold).await;
            }
        }));
    }

    /// Cancel the periodic check. Safe to call repeatedly or when never started.
    pub fn stop(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
            debug!("Session refresher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for SessionRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn check(session: &AuthSession, threshold: Duration) -> RefreshOutcome {
    let current = session.current();
    if current.access_credential().is_none() {
        return RefreshOutcome::NotAuthenticated;
    }

    let Some(remaining) = current.remaining_at(Utc::now()) else {
        return RefreshOutcome::NotNeeded;
    };
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    if remaining >= threshold {
        return RefreshOutcome::NotNeeded;
    }

    info!(
        remaining_secs = remaining.num_seconds(),
        "Access token close to expiry, refreshing"
    );
    match session.authenticate().await {
        Ok(_) => RefreshOutcome::Refreshed,
        Err(e) => {
            error!("Scheduled session refresh failed: {}", e);
            RefreshOutcome::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthConfig;
    use crate::credential::CredentialStore;
    use crate::ksef::KsefClient;

    fn idle_session() -> Arc<AuthSession> {
        let client = KsefClient::new("http://127.0.0.1:9", Duration::from_millis(100)).unwrap();
        Arc::new(AuthSession::new(
            client,
            CredentialStore::default(),
            AuthConfig::default(),
        ))
    }

    #[test]
    fn test_stop_without_start_is_safe() {
        let refresher = SessionRefresher::new(idle_session(), RefreshConfig::default());
        refresher.stop();
        refresher.stop();
        assert!(!refresher.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_cancels() {
        let refresher = SessionRefresher::new(idle_session(), RefreshConfig::default());
        refresher.start();
        refresher.start();
        assert!(refresher.is_running());

        refresher.stop();
        refresher.stop();
        assert!(!refresher.is_running());

        refresher.start();
        assert!(refresher.is_running());
    }

    #[tokio::test]
    async fn test_unauthenticated_session_is_not_refreshed() {
        let refresher = SessionRefresher::new(idle_session(), RefreshConfig::default());
        assert_eq!(refresher.check_once().await, RefreshOutcome::NotAuthenticated);
    }
}
