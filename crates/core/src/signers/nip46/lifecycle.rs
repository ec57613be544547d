//! Foreground-gated connection retry.
//!
//! Approving a login usually means switching to the signer app, which
//! suspends us mid-handshake. Failures seen while in the background are held
//! back and the handshake is retried once the host reports it is in front
//! again.

use super::error::ConnectError;
use super::manager::{ConnectManager, ConnectOutcome};
use super::transport::AuthUrlCallback;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Foreground,
    Background,
}

pub type LifecycleListener = Box<dyn Fn(AppState) + Send + Sync>;

/// Invoked each time a foreground retry begins.
pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

/// Host lifecycle signal (mobile OS app state, window focus, ...).
pub trait AppLifecycle: Send + Sync {
    fn current_state(&self) -> AppState;

    fn subscribe(&self, listener: LifecycleListener) -> LifecycleSubscription;
}

/// Listener registration. Dropping it unsubscribes.
pub struct LifecycleSubscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl LifecycleSubscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    pub fn noop() -> Self {
        Self { unsubscribe: None }
    }

    pub fn unsubscribe(mut self) {
        self.run();
    }

    fn run(&mut self) {
        if let Some(f) = self.unsubscribe.take() {
            f();
        }
    }
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        self.run();
    }
}

/// For hosts without a lifecycle: always in front, never notifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysForeground;

impl AppLifecycle for AlwaysForeground {
    fn current_state(&self) -> AppState {
        AppState::Foreground
    }

    fn subscribe(&self, _listener: LifecycleListener) -> LifecycleSubscription {
        LifecycleSubscription::noop()
    }
}

struct SubscriptionSlot<'a> {
    manager: &'a ConnectManager,
    id: u64,
}

impl Drop for SubscriptionSlot<'_> {
    fn drop(&mut self) {
        self.manager.release_subscription(self.id);
    }
}

impl ConnectManager {
    /// [`ConnectManager::wait_for_connection`] that survives the app being
    /// backgrounded. Has no overall timeout: it settles on success, on a failure
    /// seen while in the foreground, or on `abort()`.
    pub async fn wait_for_connection_with_app_state_retry(
        &self,
        on_auth_url: Option<AuthUrlCallback>,
        on_retrying: Option<RetryCallback>,
    ) -> Result<ConnectOutcome, ConnectError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.lifecycle().subscribe(Box::new(move |state: AppState| {
            let _ = tx.send(state);
        }));
        let id = self.install_subscription(subscription)?;
        let _slot = SubscriptionSlot { manager: self, id };
        debug!("[nip46] lifecycle listener installed");

        loop {
            let err = match self.wait_for_connection(on_auth_url.clone()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };
            if self.is_aborted() {
                return Ok(ConnectOutcome::Aborted);
            }
            if !matches!(err, ConnectError::Transport(_))
                || self.lifecycle().current_state() == AppState::Foreground
            {
                return Err(err);
            }

            info!(
                "[nip46] connection failed while in background ({}); waiting for foreground",
                err
            );
            // Events queued before the failure say nothing about the current state.
            while rx.try_recv().is_ok() {}

            while self.lifecycle().current_state() != AppState::Foreground {
                tokio::select! {
                    state = rx.recv() => match state {
                        Some(AppState::Foreground) => break,
                        Some(AppState::Background) => {}
                        None if self.is_aborted() => return Ok(ConnectOutcome::Aborted),
                        None => return Err(err),
                    },
                    _ = self.aborted() => {
                        info!("[nip46] connection wait aborted");
                        return Ok(ConnectOutcome::Aborted);
                    }
                }
            }

            if !self.rearm() {
                if self.is_aborted() {
                    return Ok(ConnectOutcome::Aborted);
                }
                return Err(err);
            }
            info!("[nip46] app returned to foreground, retrying connection");
            if let Some(cb) = &on_retrying {
                cb();
            }
        }
    }
}
