use super::config::ConnectConfig;
use super::error::ConnectError;
use super::identity::{self, Session};
use super::lifecycle::{AlwaysForeground, AppLifecycle, LifecycleSubscription};
use super::transport::{
    AuthUrlCallback, Handshake, HandshakeRequest, SignerChannel, SignerTransport,
    TransportError, UrlOpener,
};
use super::uri::{decode_bunker_uri, encode_bunker_uri};
use crate::types::{Event, PublicKey, UnsignedEvent};
use crate::utils::nostr_crypto::verify_event;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Generating,
    Waiting,
    Connected,
    Signing,
    Success,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Generating => "generating",
            ConnectionState::Waiting => "waiting",
            ConnectionState::Connected => "connected",
            ConnectionState::Signing => "signing",
            ConnectionState::Success => "success",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Identities learned when a channel opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub user_pubkey: String,
    pub signer_pubkey: String,
    pub bunker_uri: String,
    /// Retries taken before this connection succeeded.
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected(Connection),
    /// `abort()` or `disconnect()` was called while connecting.
    Aborted,
}

impl ConnectOutcome {
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            ConnectOutcome::Connected(c) => Some(c),
            ConnectOutcome::Aborted => None,
        }
    }
}

struct Inner {
    state: ConnectionState,
    session: Option<Session>,
    channel: Option<Arc<dyn SignerChannel>>,
    user_pubkey: Option<String>,
    signer_pubkey: Option<String>,
    in_flight: bool,
    subscription: Option<(u64, LifecycleSubscription)>,
    next_subscription_id: u64,
}

/// Owns the single active NIP-46 signing channel and drives it through
/// `idle -> generating -> waiting -> connected <-> signing`.
///
/// Methods take `&self`; share the manager behind an `Arc` so `abort()` can be
/// called while a connection attempt is outstanding. Entry points check the
/// current state and fail with `InvalidStateTransition` instead of racing.
pub struct ConnectManager {
    config: ConnectConfig,
    transport: Arc<dyn SignerTransport>,
    url_opener: Option<Arc<dyn UrlOpener>>,
    lifecycle: Arc<dyn AppLifecycle>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    abort_tx: watch::Sender<bool>,
}

struct InFlight<'a> {
    manager: &'a ConnectManager,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.manager.lock().in_flight = false;
    }
}

impl ConnectManager {
    pub fn new(config: ConnectConfig, transport: Arc<dyn SignerTransport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (abort_tx, _) = watch::channel(false);
        Self {
            config,
            transport,
            url_opener: None,
            lifecycle: Arc::new(AlwaysForeground),
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                session: None,
                channel: None,
                user_pubkey: None,
                signer_pubkey: None,
                in_flight: false,
                subscription: None,
                next_subscription_id: 0,
            }),
            state_tx,
            abort_tx,
        }
    }

    /// Handler for authorization URLs when a call does not pass its own.
    pub fn with_url_opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.url_opener = Some(opener);
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn AppLifecycle>) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn config(&self) -> &ConnectConfig {
        &self.config
    }

    // ------------------------
    // State accessors
    // ------------------------

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        let inner = self.lock();
        inner.channel.is_some() && inner.user_pubkey.is_some()
    }

    pub fn user_pubkey(&self) -> Option<String> {
        self.lock().user_pubkey.clone()
    }

    pub fn signer_pubkey(&self) -> Option<String> {
        self.lock().signer_pubkey.clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.lock().session.clone()
    }

    pub fn connection_string(&self) -> Option<String> {
        self.lock()
            .session
            .as_ref()
            .map(|s| s.connection_string().to_string())
    }

    pub fn bunker_uri(&self) -> Option<String> {
        self.lock()
            .session
            .as_ref()
            .and_then(|s| s.bunker_uri().map(str::to_string))
    }

    // ------------------------
    // Session setup
    // ------------------------

    /// Create a fresh session from the configured app metadata and relays and
    /// move to `waiting`. Returns the `nostrconnect://` URI to show the user.
    pub fn generate_session(&self) -> Result<String, ConnectError> {
        {
            let mut inner = self.lock();
            Self::ensure_can_start(&inner, "generate a session")?;
            self.set_state(&mut inner, ConnectionState::Generating);
        }

        let generated =
            identity::generate_session(&self.config.app, &self.config.relays_or_default());

        let mut inner = self.lock();
        if inner.state != ConnectionState::Generating {
            return Err(ConnectError::Cancelled);
        }
        match generated {
            Ok(session) => Ok(self.install_session(&mut inner, session)),
            Err(e) => {
                warn!("[nip46] session generation failed: {}", e);
                self.set_state(&mut inner, ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Use a caller-built session for a new handshake.
    pub fn start_session(&self, session: Session) -> Result<String, ConnectError> {
        let mut inner = self.lock();
        Self::ensure_can_start(&inner, "start a session")?;
        self.set_state(&mut inner, ConnectionState::Generating);
        Ok(self.install_session(&mut inner, session))
    }

    /// Load a previously persisted session without connecting; see [`Self::reconnect`].
    pub fn restore_session(&self, session: Session) -> Result<(), ConnectError> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Idle || inner.in_flight {
            return Err(ConnectError::InvalidStateTransition {
                state: inner.state,
                operation: "restore a session",
            });
        }
        debug!(
            "[nip46] restored session (client={})",
            session.client_public_key()
        );
        inner.session = Some(session);
        Ok(())
    }

    fn install_session(&self, inner: &mut Inner, session: Session) -> String {
        let connection_string = session.connection_string().to_string();
        info!(
            "[nip46] session ready (client={}, relays={})",
            session.client_public_key(),
            session.relays().len()
        );
        inner.session = Some(session);
        inner.channel = None;
        inner.user_pubkey = None;
        inner.signer_pubkey = None;
        self.abort_tx.send_replace(false);
        self.set_state(inner, ConnectionState::Waiting);
        connection_string
    }

    // ------------------------
    // Connecting
    // ------------------------

    /// One try at the `nostrconnect://` handshake for the current session.
    pub async fn attempt_connection(
        &self,
        on_auth_url: Option<AuthUrlCallback>,
    ) -> Result<Connection, ConnectError> {
        let (session, _in_flight) = {
            let mut inner = self.lock();
            if inner.state != ConnectionState::Waiting || inner.in_flight {
                return Err(ConnectError::InvalidStateTransition {
                    state: inner.state,
                    operation: "attempt a connection",
                });
            }
            let session = inner.session.clone().ok_or(ConnectError::NoSession)?;
            inner.in_flight = true;
            (session, InFlight { manager: self })
        };

        if self.is_aborted() {
            return Err(ConnectError::Cancelled);
        }

        debug!(
            "[nip46] connection attempt (client={})",
            session.client_public_key()
        );
        let request = HandshakeRequest {
            connection_string: session.connection_string(),
            relays: session.relays(),
            secret: session.secret(),
            client_keys: session.keys(),
            on_auth_url: self.auth_url_sink(on_auth_url),
        };

        let handshake = tokio::select! {
            res = self.transport.connect(request) => res?,
            _ = self.aborted() => return Err(ConnectError::Cancelled),
        };
        if let Err(e) = Self::check_handshake(&handshake) {
            handshake.channel.close().await;
            return Err(e);
        }

        // The signer service key, not the user key, addresses the signer on reconnect.
        let bunker_uri = encode_bunker_uri(
            &handshake.signer_pubkey,
            session.relays(),
            Some(session.secret()),
        );

        let accepted = {
            let mut inner = self.lock();
            if self.is_aborted() || inner.state != ConnectionState::Waiting {
                Err(handshake)
            } else {
                Ok(self.accept_handshake(&mut inner, handshake, bunker_uri))
            }
        };
        match accepted {
            Ok(connection) => Ok(connection),
            Err(handshake) => {
                handshake.channel.close().await;
                Err(ConnectError::Cancelled)
            }
        }
    }

    /// Repeats [`Self::attempt_connection`] while failures are recoverable, up to
    /// `max_attempts` tries spaced by `retry_delay`.
    pub async fn wait_for_connection(
        &self,
        on_auth_url: Option<AuthUrlCallback>,
    ) -> Result<ConnectOutcome, ConnectError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut retries = 0u32;

        loop {
            if self.is_aborted() {
                info!("[nip46] connection wait aborted");
                return Ok(ConnectOutcome::Aborted);
            }

            match self.attempt_connection(on_auth_url.clone()).await {
                Ok(mut connection) => {
                    connection.retries = retries;
                    return Ok(ConnectOutcome::Connected(connection));
                }
                Err(ConnectError::Cancelled) => {
                    info!("[nip46] connection wait aborted");
                    return Ok(ConnectOutcome::Aborted);
                }
                Err(e) if e.is_recoverable() && retries + 1 < max_attempts => {
                    retries += 1;
                    warn!(
                        "[nip46] connection attempt {}/{} failed: {}; retrying in {}ms",
                        retries, max_attempts, e, self.config.retry_delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_delay()) => {}
                        _ = self.aborted() => {
                            info!("[nip46] connection wait aborted");
                            return Ok(ConnectOutcome::Aborted);
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        "[nip46] giving up after {} attempt(s): {}",
                        retries + 1,
                        e
                    );
                    if matches!(e, ConnectError::Transport(_)) {
                        let mut inner = self.lock();
                        if inner.state == ConnectionState::Waiting {
                            self.set_state(&mut inner, ConnectionState::Error);
                        }
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Connect straight to a signer named by a `bunker://` URI, skipping the
    /// invitation handshake. `strip_secret` drops a `secret` that was already
    /// consumed by an earlier connect.
    pub async fn connect_with_bunker(
        &self,
        bunker_url: &str,
        strip_secret: bool,
    ) -> Result<ConnectOutcome, ConnectError> {
        let mut pointer = decode_bunker_uri(bunker_url)?;
        if strip_secret {
            pointer = pointer.without_secret();
        }
        if pointer.relays.is_empty() {
            pointer.relays = self.config.relays_or_default();
        }
        if pointer.relays.is_empty() {
            return Err(ConnectError::MissingRelays);
        }

        let (keys, _in_flight) = {
            let mut inner = self.lock();
            Self::ensure_can_start(&inner, "connect with a bunker URI")?;
            if inner.session.is_none() {
                inner.session = Some(identity::generate_session(
                    &self.config.app,
                    &pointer.relays,
                )?);
            }
            let keys = inner
                .session
                .as_ref()
                .map(|s| s.keys().clone())
                .ok_or(ConnectError::NoSession)?;
            inner.in_flight = true;
            self.abort_tx.send_replace(false);
            (keys, InFlight { manager: self })
        };

        info!(
            "[nip46] connecting to bunker {} via {} relay(s)",
            pointer.pubkey,
            pointer.relays.len()
        );
        let result = tokio::select! {
            res = self.transport.connect_bunker(&pointer, &keys, self.auth_url_sink(None)) => res,
            _ = self.aborted() => {
                info!("[nip46] bunker connect aborted");
                return Ok(ConnectOutcome::Aborted);
            }
        };

        let checked = match result {
            Ok(h) => match Self::check_handshake(&h) {
                Ok(()) => Ok(h),
                Err(e) => {
                    h.channel.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(ConnectError::from(e)),
        };
        let handshake = match checked {
            Ok(h) => h,
            Err(e) => {
                warn!("[nip46] bunker connect failed: {}", e);
                let mut inner = self.lock();
                if !self.is_aborted() {
                    self.set_state(&mut inner, ConnectionState::Error);
                }
                return Err(e);
            }
        };
        if handshake.signer_pubkey != pointer.pubkey {
            warn!(
                "[nip46] signer answered as {} instead of {}",
                handshake.signer_pubkey, pointer.pubkey
            );
        }

        let bunker_uri = pointer.to_uri();
        let accepted = {
            let mut inner = self.lock();
            if self.is_aborted() {
                Err(handshake)
            } else {
                Ok(self.accept_handshake(&mut inner, handshake, bunker_uri))
            }
        };
        match accepted {
            Ok(connection) => Ok(ConnectOutcome::Connected(connection)),
            Err(handshake) => {
                handshake.channel.close().await;
                Ok(ConnectOutcome::Aborted)
            }
        }
    }

    /// Reconnect a restored session through its stored `bunker://` URI.
    pub async fn reconnect(&self) -> Result<ConnectOutcome, ConnectError> {
        let bunker_uri = {
            let inner = self.lock();
            let session = inner.session.as_ref().ok_or(ConnectError::NoSession)?;
            session
                .bunker_uri()
                .map(str::to_string)
                .ok_or(ConnectError::MissingBunkerUri)?
        };
        self.connect_with_bunker(&bunker_uri, true).await
    }

    fn check_handshake(handshake: &Handshake) -> Result<(), ConnectError> {
        for (what, key) in [
            ("user", &handshake.user_pubkey),
            ("signer", &handshake.signer_pubkey),
        ] {
            if PublicKey::from_hex(key).is_err() {
                return Err(ConnectError::Transport(TransportError::Rejected(format!(
                    "invalid {} pubkey in handshake: {}",
                    what, key
                ))));
            }
        }
        Ok(())
    }

    fn accept_handshake(
        &self,
        inner: &mut Inner,
        handshake: Handshake,
        bunker_uri: String,
    ) -> Connection {
        if let Some(session) = inner.session.as_mut() {
            session.set_bunker_uri(bunker_uri.clone());
        }
        inner.channel = Some(handshake.channel);
        inner.user_pubkey = Some(handshake.user_pubkey.clone());
        inner.signer_pubkey = Some(handshake.signer_pubkey.clone());
        self.set_state(inner, ConnectionState::Connected);
        info!(
            "[nip46] connected (user={}, signer={})",
            handshake.user_pubkey, handshake.signer_pubkey
        );
        Connection {
            user_pubkey: handshake.user_pubkey,
            signer_pubkey: handshake.signer_pubkey,
            bunker_uri,
            retries: 0,
        }
    }

    /// Resolves the per-call callback, then the injected opener. The URL is
    /// never opened here.
    fn auth_url_sink(&self, on_auth_url: Option<AuthUrlCallback>) -> AuthUrlCallback {
        let opener = self.url_opener.clone();
        Arc::new(move |url: String| {
            info!("[nip46] remote signer requested authorization: {}", url);
            if let Some(cb) = &on_auth_url {
                cb(url);
            } else if let Some(opener) = &opener {
                opener.open_url(&url);
            } else {
                warn!("[nip46] no handler registered for authorization URL");
            }
        })
    }

    // ------------------------
    // Signing
    // ------------------------

    /// Ask the remote signer to sign `unsigned`, bounded by `sign_timeout`.
    pub async fn sign_event(&self, unsigned: UnsignedEvent) -> Result<Event, ConnectError> {
        let (channel, user_pubkey, previous) = {
            let mut inner = self.lock();
            let previous = inner.state;
            match previous {
                ConnectionState::Connected | ConnectionState::Success => {}
                ConnectionState::Signing => {
                    return Err(ConnectError::InvalidStateTransition {
                        state: previous,
                        operation: "sign an event",
                    })
                }
                _ => return Err(ConnectError::NotConnected),
            }
            let (Some(channel), Some(user_pubkey)) =
                (inner.channel.clone(), inner.user_pubkey.clone())
            else {
                return Err(ConnectError::NotConnected);
            };
            self.set_state(&mut inner, ConnectionState::Signing);
            (channel, user_pubkey, previous)
        };

        debug!("[nip46] sign_event kind={}", unsigned.kind);
        let timeout = self.config.sign_timeout();
        let result = tokio::select! {
            res = tokio::time::timeout(timeout, channel.sign_event(unsigned.clone())) => res,
            _ = self.aborted() => return Err(ConnectError::Cancelled),
        };

        {
            let mut inner = self.lock();
            if inner.state == ConnectionState::Signing {
                self.set_state(&mut inner, previous);
            }
        }

        let event = match result {
            Err(_) => {
                warn!("[nip46] sign_event timed out after {}ms", self.config.sign_timeout);
                return Err(ConnectError::SigningTimeout(timeout));
            }
            Ok(Err(e)) => {
                warn!("[nip46] sign_event failed: {}", e);
                return Err(e.into());
            }
            Ok(Ok(event)) => event,
        };

        Self::check_signed_event(&event, &unsigned, &user_pubkey)?;
        debug!("[nip46] signed event {}", event.id);
        Ok(event)
    }

    /// Sign the kind-22242 challenge event a backend exchanges for a session.
    pub async fn sign_auth_challenge(
        &self,
        challenge: &str,
        domain: &str,
    ) -> Result<Event, ConnectError> {
        self.sign_event(UnsignedEvent::auth_challenge(challenge, domain))
            .await
    }

    fn check_signed_event(
        event: &Event,
        unsigned: &UnsignedEvent,
        user_pubkey: &str,
    ) -> Result<(), ConnectError> {
        if event.pubkey != user_pubkey {
            return Err(ConnectError::InvalidSignedEvent(format!(
                "signed by {} instead of {}",
                event.pubkey, user_pubkey
            )));
        }
        if !event.matches_template(unsigned) {
            return Err(ConnectError::InvalidSignedEvent(
                "event does not match the request".to_string(),
            ));
        }
        verify_event(event).map_err(|e| ConnectError::InvalidSignedEvent(e.to_string()))
    }

    /// Record that the backend accepted our signed challenge.
    pub fn mark_success(&self) -> Result<(), ConnectError> {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Connected {
            return Err(ConnectError::InvalidStateTransition {
                state: inner.state,
                operation: "mark the login successful",
            });
        }
        self.set_state(&mut inner, ConnectionState::Success);
        Ok(())
    }

    // ------------------------
    // Teardown
    // ------------------------

    /// Cancel whatever is in progress and close the channel, returning to `idle`.
    /// The session is kept; hand it back to [`Self::start_session`] to wait on the
    /// same identity again. Safe to call repeatedly.
    pub async fn abort(&self) {
        if let Some(channel) = self.teardown() {
            channel.close().await;
        }
    }

    /// Like [`Self::abort`], but also forgets the session.
    pub async fn disconnect(&self) {
        let channel = self.teardown();
        self.lock().session = None;
        if let Some(channel) = channel {
            channel.close().await;
        }
        info!("[nip46] disconnected");
    }

    fn teardown(&self) -> Option<Arc<dyn SignerChannel>> {
        self.abort_tx.send_replace(true);
        let (subscription, channel) = {
            let mut inner = self.lock();
            let subscription = inner.subscription.take();
            let channel = inner.channel.take();
            inner.user_pubkey = None;
            inner.signer_pubkey = None;
            self.set_state(&mut inner, ConnectionState::Idle);
            (subscription, channel)
        };
        if subscription.is_some() {
            debug!("[nip46] lifecycle listener removed");
        }
        drop(subscription);
        channel
    }

    // ------------------------
    // Shared with the lifecycle coordinator
    // ------------------------

    pub(super) fn lifecycle(&self) -> &Arc<dyn AppLifecycle> {
        &self.lifecycle
    }

    /// Store the lifecycle subscription; at most one may be live.
    pub(super) fn install_subscription(
        &self,
        subscription: LifecycleSubscription,
    ) -> Result<u64, ConnectError> {
        let mut inner = self.lock();
        if inner.subscription.is_some() || inner.in_flight || inner.state != ConnectionState::Waiting
        {
            return Err(ConnectError::InvalidStateTransition {
                state: inner.state,
                operation: "wait for a connection",
            });
        }
        inner.next_subscription_id += 1;
        let id = inner.next_subscription_id;
        inner.subscription = Some((id, subscription));
        Ok(id)
    }

    pub(super) fn release_subscription(&self, id: u64) {
        let released = {
            let mut inner = self.lock();
            match &inner.subscription {
                Some((current, _)) if *current == id => inner.subscription.take(),
                _ => None,
            }
        };
        if released.is_some() {
            debug!("[nip46] lifecycle listener removed");
        }
    }

    /// `error -> waiting` so a failed wait can be retried. False when the
    /// manager moved elsewhere in the meantime.
    pub(super) fn rearm(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Error || inner.session.is_none() {
            return false;
        }
        self.set_state(&mut inner, ConnectionState::Waiting);
        true
    }

    pub(super) fn is_aborted(&self) -> bool {
        *self.abort_tx.borrow()
    }

    /// Resolves once the abort flag is raised.
    pub(super) async fn aborted(&self) {
        let mut rx = self.abort_tx.subscribe();
        let raised = rx.wait_for(|aborted| *aborted).await.map(|_| ());
        if raised.is_err() {
            std::future::pending::<()>().await;
        }
    }

    // ------------------------
    // Helpers
    // ------------------------

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            debug!("[nip46] state {} -> {}", inner.state, state);
            inner.state = state;
            self.state_tx.send_replace(state);
        }
    }

    fn ensure_can_start(inner: &Inner, operation: &'static str) -> Result<(), ConnectError> {
        match inner.state {
            ConnectionState::Idle | ConnectionState::Error if !inner.in_flight => Ok(()),
            state => Err(ConnectError::InvalidStateTransition { state, operation }),
        }
    }
}
