//! Environment config envelopes and completion signalling
//!
//! An [`EnvConfigEnvelope`] is one unit of work for the dispatcher. It carries
//! the credentials for the plugin's own environment and for the certifying
//! environment, an optional one-shot bootstrap guard and an optional
//! completion sender through which a synchronous caller learns the outcome.
//!
//! A [`CompletionSender`] delivers exactly one value. If it is dropped without
//! sending (early return, panic in the task) the receiver sees
//! [`DeployOutcome::Abandoned`] instead of waiting forever.

use sdk::errors::CarrierError;
use sdk::record::validate_plugin_name;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::secrets::SecretString;

/// Result of one deployment attempt as seen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeployOutcome {
    /// Artifact downloaded, verified and placed
    Installed { hash: String },
    /// Artifact on disk already matched the certified hash
    Verified { hash: String },
    /// Record already says deployed
    AlreadyDeployed { hash: String },
    /// Environment bootstrapped with the listed plugins
    Bootstrapped { plugins: Vec<String> },
    /// No usable certification record
    NotCertified,
    /// This host's ordinal is not in the instance list
    NotScheduled,
    /// Dispatcher refused the envelope
    Rejected { reason: String },
    /// Deployment failed
    Failed { error: String },
    /// The caller's deadline passed first
    TimedOut,
    /// The task ended without reporting
    Abandoned,
}

impl DeployOutcome {
    /// Hash of the artifact that is now in place, if any
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Installed { hash } | Self::Verified { hash } | Self::AlreadyDeployed { hash } => {
                Some(hash.as_str())
            }
            _ => None,
        }
    }

    /// The artifact is present and verified on this host
    pub fn is_success(&self) -> bool {
        self.hash().is_some()
    }

    /// Quiet exits that are not failures
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::NotCertified | Self::NotScheduled)
    }
}

impl fmt::Display for DeployOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed { hash } => write!(f, "installed {}", hash),
            Self::Verified { hash } => write!(f, "verified {}", hash),
            Self::AlreadyDeployed { hash } => write!(f, "already deployed {}", hash),
            Self::Bootstrapped { plugins } => write!(f, "bootstrapped {} plugins", plugins.len()),
            Self::NotCertified => f.write_str("not certified"),
            Self::NotScheduled => f.write_str("not scheduled on this instance"),
            Self::Rejected { reason } => write!(f, "rejected: {}", reason),
            Self::Failed { error } => write!(f, "failed: {}", error),
            Self::TimedOut => f.write_str("timed out"),
            Self::Abandoned => f.write_str("abandoned"),
        }
    }
}

/// Create a single-use completion channel
pub fn completion_channel() -> (CompletionSender, CompletionReceiver) {
    let (tx, rx) = oneshot::channel();
    (CompletionSender { tx: Some(tx) }, CompletionReceiver { rx })
}

/// Sending half of a completion channel
pub struct CompletionSender {
    tx: Option<oneshot::Sender<DeployOutcome>>,
}

impl CompletionSender {
    /// Deliver the outcome. Returns false when the receiver is gone.
    pub fn send(mut self, outcome: DeployOutcome) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

impl Drop for CompletionSender {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(DeployOutcome::Abandoned);
        }
    }
}

impl fmt::Debug for CompletionSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSender")
            .field("pending", &self.tx.is_some())
            .finish()
    }
}

/// Receiving half of a completion channel
#[derive(Debug)]
pub struct CompletionReceiver {
    rx: oneshot::Receiver<DeployOutcome>,
}

impl CompletionReceiver {
    /// Wait for the outcome, giving up after `deadline`
    pub async fn wait(self, deadline: Duration) -> DeployOutcome {
        match tokio::time::timeout(deadline, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => DeployOutcome::Abandoned,
            Err(_) => DeployOutcome::TimedOut,
        }
    }
}

/// One-shot guard shared by the clones of a bootstrap envelope
#[derive(Debug, Clone, Default)]
pub struct BootstrapGuard(Arc<AtomicBool>);

impl BootstrapGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard. Only the first caller gets `true`.
    pub fn claim(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Address and token of one record store
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub address: String,
    pub token: SecretString,
}

impl Credentials {
    pub fn new(address: impl Into<String>, token: SecretString) -> Self {
        Self {
            address: address.into(),
            token,
        }
    }
}

/// Unit of work for the dispatcher
#[derive(Debug)]
pub struct EnvConfigEnvelope {
    /// Environment name
    pub env: String,
    /// Plugin to deploy; `None` bootstraps the environment
    pub plugin_name: Option<String>,
    /// The plugin's own environment
    pub vault: Credentials,
    /// The certifying environment, authoritative for records
    pub certify: Credentials,
    pub bootstrap: Option<BootstrapGuard>,
    pub completion: Option<CompletionSender>,
}

impl EnvConfigEnvelope {
    /// Envelope that bootstraps `env`
    pub fn bootstrap(env: impl Into<String>, vault: Credentials, certify: Credentials) -> Self {
        Self {
            env: env.into(),
            plugin_name: None,
            vault,
            certify,
            bootstrap: Some(BootstrapGuard::new()),
            completion: None,
        }
    }

    /// Envelope that deploys one plugin in `env`
    pub fn for_plugin(
        env: impl Into<String>,
        plugin: impl Into<String>,
        vault: Credentials,
        certify: Credentials,
    ) -> Self {
        Self {
            env: env.into(),
            plugin_name: Some(plugin.into()),
            vault,
            certify,
            bootstrap: None,
            completion: None,
        }
    }

    /// Attach a completion channel and return its receiving half
    pub fn with_completion(mut self) -> (Self, CompletionReceiver) {
        let (tx, rx) = completion_channel();
        self.completion = Some(tx);
        (self, rx)
    }

    /// Deep copy for a worker task. The completion sender stays behind.
    pub fn fork(&self) -> Self {
        Self {
            env: self.env.clone(),
            plugin_name: self.plugin_name.clone(),
            vault: self.vault.clone(),
            certify: self.certify.clone(),
            bootstrap: self.bootstrap.clone(),
            completion: None,
        }
    }

    /// Deep copy retargeted at `plugin`, without bootstrap guard
    pub fn fork_for_plugin(&self, plugin: &str) -> Self {
        Self {
            plugin_name: Some(plugin.to_string()),
            bootstrap: None,
            ..self.fork()
        }
    }

    pub fn take_completion(&mut self) -> Option<CompletionSender> {
        self.completion.take()
    }

    pub fn is_bootstrap(&self) -> bool {
        self.plugin_name.is_none()
    }

    /// Wipe the tokens held by this envelope
    pub fn scrub(&mut self) {
        self.vault.token.clear();
        self.certify.token.clear();
    }

    /// Check that the envelope carries what a worker needs
    pub fn validate(&self) -> Result<(), CarrierError> {
        let missing = [
            ("env", self.env.is_empty()),
            ("vaddress", self.vault.address.is_empty()),
            ("caddress", self.certify.address.is_empty()),
            ("ctoken", self.certify.token.is_empty()),
        ]
        .into_iter()
        .filter(|(_, empty)| *empty)
        .map(|(name, _)| name)
        .collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(CarrierError::Config(format!(
                "Envelope is missing {}",
                missing.join(", ")
            )));
        }

        if self.vault.address == self.certify.address
            && self.vault.token.unsecure() == self.certify.token.unsecure()
        {
            return Err(CarrierError::Config(
                "Certifying credentials must differ from the plugin environment's".to_string(),
            ));
        }

        if let Some(plugin) = &self.plugin_name {
            validate_plugin_name(plugin)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(address: &str) -> Credentials {
        Credentials::new(address, SecretString::new("token"))
    }

    #[tokio::test]
    async fn test_completion_delivers_once() {
        let (tx, rx) = completion_channel();
        assert!(tx.send(DeployOutcome::NotScheduled));
        assert_eq!(
            rx.wait(Duration::from_secs(1)).await,
            DeployOutcome::NotScheduled
        );
    }

    #[tokio::test]
    async fn test_dropped_sender_reports_abandoned() {
        let (tx, rx) = completion_channel();
        drop(tx);
        assert_eq!(rx.wait(Duration::from_secs(1)).await, DeployOutcome::Abandoned);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_tx, rx) = completion_channel();
        assert_eq!(
            rx.wait(Duration::from_millis(20)).await,
            DeployOutcome::TimedOut
        );
    }

    #[test]
    fn test_guard_claims_once_across_clones() {
        let guard = BootstrapGuard::new();
        let clone = guard.clone();
        assert!(guard.claim());
        assert!(!clone.claim());
        assert!(clone.is_claimed());
    }

    #[test]
    fn test_fork_leaves_completion_behind() {
        let envelope = EnvConfigEnvelope::for_plugin("dev", "p", creds("a"), creds("c"));
        let (envelope, _rx) = envelope.with_completion();

        let forked = envelope.fork();
        assert!(forked.completion.is_none());
        assert!(envelope.completion.is_some());
        assert_eq!(forked.certify.token.unsecure(), "token");
    }

    #[test]
    fn test_scrub_does_not_touch_forks() {
        let mut envelope = EnvConfigEnvelope::bootstrap("dev", creds("a"), creds("c"));
        let forked = envelope.fork_for_plugin("p");
        envelope.scrub();

        assert!(envelope.certify.token.is_empty());
        assert_eq!(forked.certify.token.unsecure(), "token");
        assert!(forked.bootstrap.is_none());
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let envelope = EnvConfigEnvelope::for_plugin(
            "dev",
            "p",
            creds("a"),
            Credentials::new("", SecretString::default()),
        );
        let err = envelope.validate().unwrap_err().to_string();
        assert!(err.contains("caddress"));
        assert!(err.contains("ctoken"));
    }

    #[test]
    fn test_validate_requires_separate_certifying_credentials() {
        let envelope = EnvConfigEnvelope::for_plugin("dev", "p", creds("a"), creds("a"));
        assert!(matches!(envelope.validate(), Err(CarrierError::Config(_))));

        let other_token = Credentials::new("a", SecretString::new("certify-token"));
        let envelope = EnvConfigEnvelope::for_plugin("dev", "p", creds("a"), other_token);
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_plugin_name() {
        let envelope = EnvConfigEnvelope::for_plugin("dev", "../x", creds("a"), creds("c"));
        assert!(matches!(
            envelope.validate(),
            Err(CarrierError::InvalidPluginName(_))
        ));
    }

    #[test]
    fn test_outcome_hash() {
        let outcome = DeployOutcome::Installed {
            hash: "abc".to_string(),
        };
        assert_eq!(outcome.hash(), Some("abc"));
        assert!(!DeployOutcome::NotScheduled.is_success());
        assert!(DeployOutcome::NotScheduled.is_skipped());
    }
}
