//! Relay handshake
//!
//! A tunnel client that upgrades on the API host presents a subdomain, a
//! username and an API key. The handshake moves through
//! `Received -> IdentityLookup -> SecretVerification -> Accepted`, and any
//! step may end in `Rejected`. Rejection always closes the client's channel.

use crate::credentials::{SecretVerifier, UserDirectory, UserRecord};
use crate::dns::DnsSync;
use crate::hostnames::{Hostnames, is_dns_label};
use crate::registry::{Registration, RelayRegistry};
use crate::relay::{Relay, RelayChannel};
use http::HeaderMap;
use spacekit_core::tracing::metrics::{counter, histogram};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info, info_span, warn};

pub const SUBDOMAIN_HEADER: &str = "x-spacekit-subdomain";
pub const USERNAME_HEADER: &str = "x-spacekit-username";
pub const APIKEY_HEADER: &str = "x-spacekit-apikey";

/// Credentials presented by a tunnel client, as received
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ClaimedIdentity {
    pub subdomain: Option<String>,
    pub username: Option<String>,
    pub secret: Option<String>,
}

impl ClaimedIdentity {
    /// Read the three handshake headers. Non-UTF-8 values count as absent.
    ///
    /// Subdomain and username are trimmed; the API key is kept exactly as
    /// received.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            subdomain: read(SUBDOMAIN_HEADER).map(|v| v.trim().to_string()),
            username: read(USERNAME_HEADER).map(|v| v.trim().to_string()),
            secret: read(APIKEY_HEADER),
        }
    }
}

// Never print the secret
impl fmt::Debug for ClaimedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimedIdentity")
            .field("subdomain", &self.subdomain)
            .field("username", &self.username)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A freshly upgraded channel awaiting its handshake
pub struct PendingHandshake {
    identity: ClaimedIdentity,
    channel: Arc<dyn RelayChannel>,
}

impl PendingHandshake {
    pub fn new(identity: ClaimedIdentity, channel: Arc<dyn RelayChannel>) -> Self {
        Self { identity, channel }
    }
}

/// Why a handshake was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A header was missing or not a valid DNS label
    Malformed(String),
    /// The hostname already has a relay
    Duplicate,
    /// The credential store failed or the user is unknown
    LookupFailed(String),
    /// The secret did not match or could not be checked
    BadSecret(String),
    /// The handshake did not finish in time
    TimedOut,
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Malformed(_) => "malformed",
            Rejection::Duplicate => "duplicate",
            Rejection::LookupFailed(_) => "lookup_failed",
            Rejection::BadSecret(_) => "bad_secret",
            Rejection::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Malformed(reason) => write!(f, "malformed handshake: {reason}"),
            Rejection::Duplicate => f.write_str("hostname already has a relay"),
            Rejection::LookupFailed(reason) => write!(f, "user lookup failed: {reason}"),
            Rejection::BadSecret(reason) => write!(f, "secret verification failed: {reason}"),
            Rejection::TimedOut => f.write_str("handshake timed out"),
        }
    }
}

/// Handshake states. Each call to [`RelayHandshake::step`] performs one transition.
pub enum HandshakeState {
    Received(PendingHandshake),
    IdentityLookup {
        hostname: String,
        username: String,
        secret: String,
        channel: Arc<dyn RelayChannel>,
    },
    SecretVerification {
        hostname: String,
        user: UserRecord,
        secret: String,
        channel: Arc<dyn RelayChannel>,
    },
    Accepted(Arc<Relay>),
    Rejected(Rejection),
}

impl HandshakeState {
    pub fn name(&self) -> &'static str {
        match self {
            HandshakeState::Received(_) => "received",
            HandshakeState::IdentityLookup { .. } => "identity_lookup",
            HandshakeState::SecretVerification { .. } => "secret_verification",
            HandshakeState::Accepted(_) => "accepted",
            HandshakeState::Rejected(_) => "rejected",
        }
    }
}

/// Terminal result of a handshake
#[derive(Debug)]
pub enum HandshakeOutcome {
    Accepted(Arc<Relay>),
    Rejected(Rejection),
}

impl HandshakeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, HandshakeOutcome::Accepted(_))
    }
}

/// Drives handshakes to completion and registers accepted relays
#[derive(Clone)]
pub struct RelayHandshake {
    hostnames: Arc<Hostnames>,
    registry: RelayRegistry,
    users: Arc<dyn UserDirectory>,
    verifier: Arc<dyn SecretVerifier>,
    dns_sync: Option<DnsSync>,
    timeout: Option<Duration>,
}

impl RelayHandshake {
    pub fn new(
        hostnames: Arc<Hostnames>,
        registry: RelayRegistry,
        users: Arc<dyn UserDirectory>,
        verifier: Arc<dyn SecretVerifier>,
    ) -> Self {
        Self {
            hostnames,
            registry,
            users,
            verifier,
            dns_sync: None,
            timeout: None,
        }
    }

    /// Publish DNS for every accepted relay
    pub fn with_dns_sync(mut self, dns_sync: DnsSync) -> Self {
        self.dns_sync = Some(dns_sync);
        self
    }

    /// Bound the whole handshake; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a handshake from `Received` to a terminal state
    pub async fn run(&self, pending: PendingHandshake) -> HandshakeOutcome {
        let started = Instant::now();
        let channel = pending.channel.clone();
        let span = info_span!(
            "relay_handshake",
            subdomain = pending.identity.subdomain.as_deref().unwrap_or(""),
            username = pending.identity.username.as_deref().unwrap_or(""),
        );

        let drive = async {
            let mut state = HandshakeState::Received(pending);
            loop {
                state = match self.step(state).await {
                    HandshakeState::Accepted(relay) => return HandshakeOutcome::Accepted(relay),
                    HandshakeState::Rejected(reason) => return HandshakeOutcome::Rejected(reason),
                    next => {
                        debug!(state = next.name(), "Handshake advanced");
                        next
                    }
                };
            }
        };

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, drive)
                .instrument(span.clone())
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _guard = span.enter();
                    self.reject(&channel, Rejection::TimedOut, None);
                    HandshakeOutcome::Rejected(Rejection::TimedOut)
                }
            },
            None => drive.instrument(span).await,
        };

        histogram("relay_handshake_duration_seconds").observe_duration(started.elapsed());
        outcome
    }

    /// Perform a single transition. Terminal states are returned unchanged.
    pub async fn step(&self, state: HandshakeState) -> HandshakeState {
        match state {
            HandshakeState::Received(pending) => self.received(pending),
            HandshakeState::IdentityLookup {
                hostname,
                username,
                secret,
                channel,
            } => match self.users.find_user(&username).await {
                Ok(Some(user)) => HandshakeState::SecretVerification {
                    hostname,
                    user,
                    secret,
                    channel,
                },
                Ok(None) => self.reject(
                    &channel,
                    Rejection::LookupFailed(format!("unknown user {username}")),
                    Some(&hostname),
                ),
                Err(e) => self.reject(&channel, Rejection::LookupFailed(e.to_string()), Some(&hostname)),
            },
            HandshakeState::SecretVerification {
                hostname,
                user,
                secret,
                channel,
            } => match self.verifier.verify(&secret, &user.secret_hash).await {
                Ok(true) => self.accept(hostname, user, channel),
                Ok(false) => self.reject(
                    &channel,
                    Rejection::BadSecret("secret does not match".to_string()),
                    Some(&hostname),
                ),
                Err(e) => self.reject(&channel, Rejection::BadSecret(e.to_string()), Some(&hostname)),
            },
            terminal @ (HandshakeState::Accepted(_) | HandshakeState::Rejected(_)) => terminal,
        }
    }

    fn received(&self, pending: PendingHandshake) -> HandshakeState {
        let PendingHandshake { identity, channel } = pending;

        let (subdomain, username, secret) = match validate_identity(identity) {
            Ok(parts) => parts,
            Err(reason) => return self.reject(&channel, reason, None),
        };

        let hostname = self.hostnames.relay_hostname(&subdomain, &username);
        if self.registry.lookup(&hostname).is_some() {
            return self.reject(&channel, Rejection::Duplicate, Some(&hostname));
        }

        HandshakeState::IdentityLookup {
            hostname,
            username,
            secret,
            channel,
        }
    }

    // No await points: once registered, the outcome is returned in the same poll.
    fn accept(
        &self,
        hostname: String,
        user: UserRecord,
        channel: Arc<dyn RelayChannel>,
    ) -> HandshakeState {
        let relay = Arc::new(Relay::new(hostname.clone(), user.id, channel.clone()));

        match self.registry.register_if_absent(relay.clone()) {
            Registration::RejectedDuplicate => {
                self.reject(&channel, Rejection::Duplicate, Some(&hostname))
            }
            Registration::Accepted => {
                self.watch_close(relay.clone());
                if let Some(dns_sync) = &self.dns_sync {
                    dns_sync.spawn_upsert(hostname.clone());
                }
                counter("relay_handshakes_accepted_total").increment();
                info!(hostname = %hostname, relay = %relay.id(), "Relay accepted");
                HandshakeState::Accepted(relay)
            }
        }
    }

    /// Unregister the relay once its channel closes
    fn watch_close(&self, relay: Arc<Relay>) {
        let registry = self.registry.clone();
        tokio::spawn(
            async move {
                relay.closed().await;
                if registry.unregister(&relay) {
                    info!(hostname = %relay.hostname(), relay = %relay.id(), "Relay disconnected");
                }
            }
            .in_current_span(),
        );
    }

    fn reject(
        &self,
        channel: &Arc<dyn RelayChannel>,
        reason: Rejection,
        hostname: Option<&str>,
    ) -> HandshakeState {
        counter("relay_handshakes_rejected_total").increment();
        warn!(
            hostname = hostname.unwrap_or(""),
            reason = reason.kind(),
            "Relay rejected: {reason}"
        );
        channel.close();
        HandshakeState::Rejected(reason)
    }
}

fn validate_identity(
    identity: ClaimedIdentity,
) -> Result<(String, String, String), Rejection> {
    let subdomain = require(identity.subdomain, SUBDOMAIN_HEADER)?;
    let username = require(identity.username, USERNAME_HEADER)?;
    let secret = require(identity.secret, APIKEY_HEADER)?;

    for (header, value) in [(SUBDOMAIN_HEADER, &subdomain), (USERNAME_HEADER, &username)] {
        if !is_dns_label(value) {
            return Err(Rejection::Malformed(format!(
                "{header} is not a valid DNS label"
            )));
        }
    }

    Ok((subdomain, username, secret))
}

fn require(value: Option<String>, header: &str) -> Result<String, Rejection> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Rejection::Malformed(format!("missing {header}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::mock::{MockSecretVerifier, MockUserDirectory};
    use crate::error::RelayError;
    use crate::test_utils::TestChannel;
    use mockall::predicate::eq;

    fn identity(subdomain: &str, username: &str, secret: &str) -> ClaimedIdentity {
        ClaimedIdentity {
            subdomain: Some(subdomain.to_string()),
            username: Some(username.to_string()),
            secret: Some(secret.to_string()),
        }
    }

    fn alice() -> UserRecord {
        UserRecord {
            id: "42".to_string(),
            secret_hash: "hash-of-key".to_string(),
        }
    }

    fn handshake(
        registry: &RelayRegistry,
        users: MockUserDirectory,
        verifier: MockSecretVerifier,
    ) -> RelayHandshake {
        RelayHandshake::new(
            Arc::new(Hostnames::new("spacekit.io")),
            registry.clone(),
            Arc::new(users),
            Arc::new(verifier),
        )
    }

    fn accepting_users() -> MockUserDirectory {
        let mut users = MockUserDirectory::new();
        users
            .expect_find_user()
            .with(eq("alice"))
            .returning(|_| Ok(Some(alice())));
        users
    }

    fn verifier_returning(valid: bool) -> MockSecretVerifier {
        let mut verifier = MockSecretVerifier::new();
        verifier
            .expect_verify()
            .with(eq("key"), eq("hash-of-key"))
            .returning(move |_, _| Ok(valid));
        verifier
    }

    #[test]
    fn test_claimed_identity_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(SUBDOMAIN_HEADER, "blog".parse().unwrap());
        headers.insert(USERNAME_HEADER, "alice".parse().unwrap());
        headers.insert(APIKEY_HEADER, "key".parse().unwrap());

        assert_eq!(
            ClaimedIdentity::from_headers(&headers),
            identity("blog", "alice", "key")
        );
    }

    #[test]
    fn test_claimed_identity_debug_redacts_secret() {
        let rendered = format!("{:?}", identity("blog", "alice", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_api_key_kept_as_received() {
        let mut headers = HeaderMap::new();
        headers.insert(SUBDOMAIN_HEADER, " blog ".parse().unwrap());
        headers.insert(USERNAME_HEADER, "alice ".parse().unwrap());
        headers.insert(APIKEY_HEADER, " key ".parse().unwrap());

        assert_eq!(
            ClaimedIdentity::from_headers(&headers),
            identity("blog", "alice", " key ")
        );
    }

    #[tokio::test]
    async fn test_accepts_and_registers() {
        let registry = RelayRegistry::new();
        let hs = handshake(&registry, accepting_users(), verifier_returning(true));
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;

        let HandshakeOutcome::Accepted(relay) = outcome else {
            panic!("expected acceptance, got {outcome:?}");
        };
        assert_eq!(relay.hostname(), "blog.alice.spacekit.io");
        assert_eq!(relay.user_id(), "42");
        assert!(!channel.is_closed());
        assert_eq!(
            registry.lookup("blog.alice.spacekit.io").unwrap().id(),
            relay.id()
        );
    }

    #[tokio::test]
    async fn test_missing_header_is_malformed() {
        let registry = RelayRegistry::new();
        let mut users = MockUserDirectory::new();
        users.expect_find_user().times(0);
        let hs = handshake(&registry, users, MockSecretVerifier::new());
        let channel = TestChannel::new();

        let mut claimed = identity("blog", "alice", "key");
        claimed.secret = None;
        let outcome = hs.run(PendingHandshake::new(claimed, channel.clone())).await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::Malformed(_))
        ));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_duplicate_hostname_rejected_before_lookup() {
        let registry = RelayRegistry::new();
        let existing = Arc::new(Relay::new(
            "blog.alice.spacekit.io",
            "42",
            TestChannel::new(),
        ));
        registry.register_if_absent(existing.clone());

        let mut users = MockUserDirectory::new();
        users.expect_find_user().times(0);
        let hs = handshake(&registry, users, MockSecretVerifier::new());
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::Duplicate)
        ));
        assert!(channel.is_closed());
        assert_eq!(
            registry.lookup("blog.alice.spacekit.io").unwrap().id(),
            existing.id()
        );
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let registry = RelayRegistry::new();
        let mut users = MockUserDirectory::new();
        users.expect_find_user().returning(|_| Ok(None));
        let mut verifier = MockSecretVerifier::new();
        verifier.expect_verify().times(0);
        let hs = handshake(&registry, users, verifier);
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "mallory", "key"),
                channel.clone(),
            ))
            .await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::LookupFailed(_))
        ));
        assert!(channel.is_closed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_store_error_rejected() {
        let registry = RelayRegistry::new();
        let mut users = MockUserDirectory::new();
        users
            .expect_find_user()
            .returning(|_| Err(RelayError::CredentialStore("connection refused".into())));
        let hs = handshake(&registry, users, MockSecretVerifier::new());
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::LookupFailed(_))
        ));
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let registry = RelayRegistry::new();
        let hs = handshake(&registry, accepting_users(), verifier_returning(false));
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::BadSecret(_))
        ));
        assert!(channel.is_closed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_verifier_error_rejected() {
        let registry = RelayRegistry::new();
        let mut verifier = MockSecretVerifier::new();
        verifier
            .expect_verify()
            .returning(|_, _| Err(RelayError::SecretVerification("malformed hash".into())));
        let hs = handshake(&registry, accepting_users(), verifier);
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::BadSecret(_))
        ));
    }

    #[tokio::test]
    async fn test_step_by_step_transitions() {
        let registry = RelayRegistry::new();
        let hs = handshake(&registry, accepting_users(), verifier_returning(true));

        let state = HandshakeState::Received(PendingHandshake::new(
            identity("blog", "alice", "key"),
            TestChannel::new(),
        ));
        let state = hs.step(state).await;
        assert_eq!(state.name(), "identity_lookup");
        let state = hs.step(state).await;
        assert_eq!(state.name(), "secret_verification");
        let state = hs.step(state).await;
        assert_eq!(state.name(), "accepted");
        let state = hs.step(state).await;
        assert_eq!(state.name(), "accepted");
    }

    #[tokio::test]
    async fn test_lost_race_is_duplicate() {
        let registry = RelayRegistry::new();
        let hs = handshake(&registry, accepting_users(), verifier_returning(true));
        let channel = TestChannel::new();

        let state = HandshakeState::Received(PendingHandshake::new(
            identity("blog", "alice", "key"),
            channel.clone(),
        ));
        let state = hs.step(state).await;
        let state = hs.step(state).await;
        assert_eq!(state.name(), "secret_verification");

        // Another client registers while this one is still verifying
        let winner = Arc::new(Relay::new(
            "blog.alice.spacekit.io",
            "42",
            TestChannel::new(),
        ));
        registry.register_if_absent(winner.clone());

        let state = hs.step(state).await;
        assert!(matches!(
            state,
            HandshakeState::Rejected(Rejection::Duplicate)
        ));
        assert!(channel.is_closed());
        assert_eq!(
            registry.lookup("blog.alice.spacekit.io").unwrap().id(),
            winner.id()
        );
    }

    #[tokio::test]
    async fn test_channel_close_unregisters() {
        let registry = RelayRegistry::new();
        let hs = handshake(&registry, accepting_users(), verifier_returning(true));
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;
        assert!(outcome.is_accepted());

        channel.close();
        for _ in 0..100 {
            if registry.lookup("blog.alice.spacekit.io").is_none() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("relay was not unregistered after channel close");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_closes() {
        let registry = RelayRegistry::new();
        let mut users = MockUserDirectory::new();
        users.expect_find_user().returning(|_| Ok(Some(alice())));

        struct StalledVerifier;
        #[async_trait::async_trait]
        impl SecretVerifier for StalledVerifier {
            async fn verify(&self, _: &str, _: &str) -> crate::error::Result<bool> {
                std::future::pending().await
            }
        }

        let hs = RelayHandshake::new(
            Arc::new(Hostnames::new("spacekit.io")),
            registry.clone(),
            Arc::new(users),
            Arc::new(StalledVerifier),
        )
        .with_timeout(Some(Duration::from_secs(5)));
        let channel = TestChannel::new();

        let outcome = hs
            .run(PendingHandshake::new(
                identity("blog", "alice", "key"),
                channel.clone(),
            ))
            .await;

        assert!(matches!(
            outcome,
            HandshakeOutcome::Rejected(Rejection::TimedOut)
        ));
        assert!(channel.is_closed());
        assert!(registry.is_empty());
    }
}
