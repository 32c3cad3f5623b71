//! Token refresh loop: one background task per refreshable credential.
//! Sleeps until `expires_at - refresh_buffer`, calls the plugin's
//! `refresh()` under a 30 s timeout, and republishes the renewed token to
//! the shared host registry before its next sleep.

use crate::credential::Credential;
use crate::error::MoatError;
use crate::plugin::ProviderPlugin;
use crate::proxy::configurator::HostRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Duration as StdDuration;

const INITIAL_BACKOFF: StdDuration = StdDuration::from_secs(30);
const MAX_BACKOFF: StdDuration = StdDuration::from_secs(5 * 60);
const REFRESH_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Handle to a running refresh task. Dropping this does not stop the task;
/// call `stop().await` for a clean shutdown with the "stopped" signal the
/// supervisor can wait on.
pub struct RefreshHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    stopped_rx: oneshot::Receiver<()>,
    join: tokio::task::JoinHandle<()>,
}

impl RefreshHandle {
    /// Close the stop channel and wait for the task's "stopped" signal.
    /// Does not preempt an in-flight refresh call.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.stopped_rx).await;
        let _ = self.join.await;
    }
}

/// Spawn the refresh task for one credential. `registry` is the shared,
/// per-run host registry the task republishes into on success.
pub fn spawn(
    plugin: Arc<dyn ProviderPlugin>,
    credential: Credential,
    registry: Arc<Mutex<HostRegistry>>,
) -> RefreshHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel();
    let (stopped_tx, stopped_rx) = oneshot::channel();

    let join = tokio::spawn(async move {
        let mut current = credential;
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let sleep_for = sleep_duration(current.expires_at, plugin.refresh_buffer());

            tokio::select! {
                _ = &mut stop_rx => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            // stop_rx may have fired exactly as the sleep completed; recheck
            // before doing any work so a close always wins a race.
            if stop_rx.try_recv().is_ok() {
                break;
            }

            match tokio::time::timeout(REFRESH_TIMEOUT, plugin.refresh(&current)).await {
                Ok(Ok(refreshed)) => {
                    {
                        let mut reg = registry.lock().await;
                        let mut cfg = reg.for_plugin(plugin.name());
                        if let Err(e) = plugin.configure_proxy(&refreshed, &mut cfg) {
                            tracing::warn!(provider = plugin.name(), error = %e, "failed to republish refreshed credential");
                        }
                    }
                    current = refreshed;
                    backoff = INITIAL_BACKOFF;
                }
                Ok(Err(e)) if e.is_revoked() => {
                    tracing::warn!(provider = plugin.name(), error = %e, "credential revoked, stopping refresh task");
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(provider = plugin.name(), error = %e, backoff_secs = backoff.as_secs(), "refresh failed, retrying with backoff");
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Err(_timeout) => {
                    let err = MoatError::TransientNetwork(format!("{} refresh timed out", plugin.name()));
                    tracing::debug!(provider = plugin.name(), error = %err, backoff_secs = backoff.as_secs(), "refresh timed out, retrying with backoff");
                    tokio::select! {
                        _ = &mut stop_rx => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        let _ = stopped_tx.send(());
    });

    RefreshHandle { stop_tx: Some(stop_tx), stopped_rx, join }
}

fn sleep_duration(expires_at: Option<DateTime<Utc>>, buffer: chrono::Duration) -> StdDuration {
    let Some(expires_at) = expires_at else {
        return MAX_BACKOFF;
    };
    let wake_at = expires_at - buffer;
    let remaining = wake_at - Utc::now();
    remaining.to_std().unwrap_or(StdDuration::from_secs(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{auth_types, meta_keys};
    use crate::error::Result;
    use crate::plugin::{GrantCallbacks, GrantRequest, StagedFile};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyThenRevokedPlugin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ProviderPlugin for FlakyThenRevokedPlugin {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn grant(&self, _: &GrantRequest, _: &dyn GrantCallbacks) -> Result<Credential> {
            unimplemented!()
        }
        fn configure_proxy(&self, credential: &Credential, configurator: &mut crate::proxy::configurator::ProxyConfigurator<'_>) -> Result<()> {
            configurator.set_credential("api.flaky.test", &credential.token)
        }
        fn container_env(&self, _: &Credential) -> Vec<(String, String)> {
            Vec::new()
        }
        fn container_mounts(&self, _: &Credential) -> Result<Vec<StagedFile>> {
            Ok(Vec::new())
        }
        fn cleanup(&self, _: &str) -> Result<()> {
            Ok(())
        }
        fn supports_refresh(&self) -> bool {
            true
        }
        fn refresh_buffer(&self) -> chrono::Duration {
            chrono::Duration::seconds(0)
        }
        async fn refresh(&self, _credential: &Credential) -> Result<Credential> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(MoatError::TransientNetwork("flaky upstream".into()))
            } else {
                Err(MoatError::Revoked("invalid_grant".into()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_refreshed_token_before_next_sleep() {
        struct OnceRefresh;
        #[async_trait]
        impl ProviderPlugin for OnceRefresh {
            fn name(&self) -> &str {
                "once"
            }
            async fn grant(&self, _: &GrantRequest, _: &dyn GrantCallbacks) -> Result<Credential> {
                unimplemented!()
            }
            fn configure_proxy(&self, credential: &Credential, configurator: &mut crate::proxy::configurator::ProxyConfigurator<'_>) -> Result<()> {
                configurator.set_credential("api.once.test", &credential.token)
            }
            fn container_env(&self, _: &Credential) -> Vec<(String, String)> {
                Vec::new()
            }
            fn container_mounts(&self, _: &Credential) -> Result<Vec<StagedFile>> {
                Ok(Vec::new())
            }
            fn cleanup(&self, _: &str) -> Result<()> {
                Ok(())
            }
            fn supports_refresh(&self) -> bool {
                true
            }
            fn refresh_buffer(&self) -> chrono::Duration {
                chrono::Duration::seconds(0)
            }
            async fn refresh(&self, _credential: &Credential) -> Result<Credential> {
                Ok(Credential::new("once", "new-token")
                    .with_auth_type(auth_types::OAUTH)
                    .with_expires_at(Utc::now() + chrono::Duration::hours(1)))
            }
        }

        let plugin: Arc<dyn ProviderPlugin> = Arc::new(OnceRefresh);
        let cred = Credential::new("once", "old-token")
            .with_expires_at(Utc::now() + chrono::Duration::milliseconds(10));
        let registry = Arc::new(Mutex::new(HostRegistry::new()));
        let handle = spawn(plugin, cred, registry.clone());

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        let reg = registry.lock().await;
        let rule = reg.resolve("api.once.test").unwrap();
        assert_eq!(rule.credential.as_ref().unwrap().header_value, "Bearer new-token");
        drop(reg);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn revoked_error_stops_task_and_sends_stopped_signal() {
        let plugin: Arc<dyn ProviderPlugin> = Arc::new(FlakyThenRevokedPlugin { calls: AtomicUsize::new(0) });
        let cred = Credential::new("flaky", "tok")
            .with_expires_at(Utc::now() + chrono::Duration::milliseconds(1));
        let registry = Arc::new(Mutex::new(HostRegistry::new()));
        let handle = spawn(plugin.clone(), cred, registry);

        // First wake: transient failure, backs off 30s. Second wake (after
        // advancing past the backoff): revoked, task exits.
        tokio::time::sleep(StdDuration::from_secs(31)).await;
        handle.stop().await;
    }

    #[test]
    fn sleep_duration_with_no_expiry_falls_back_to_max_backoff() {
        let d = sleep_duration(None, chrono::Duration::minutes(5));
        assert_eq!(d, MAX_BACKOFF);
    }

    #[test]
    fn sleep_duration_clamps_past_due_to_zero() {
        let expired = Utc::now() - chrono::Duration::hours(1);
        let d = sleep_duration(Some(expired), chrono::Duration::minutes(5));
        assert_eq!(d, StdDuration::from_secs(0));
    }
}
