//! Config distribution dispatcher
//!
//! The dispatcher consumes [`EnvConfigEnvelope`]s from a bounded queue and
//! turns each into an independent task:
//!
//! - an envelope without a plugin name bootstraps its environment, at most
//!   once, and learns the authoritative plugin list from the certifying store
//! - an envelope with a plugin name deploys that plugin, provided the plugin is
//!   in the environment's list
//!
//! The dispatcher never waits for one task before starting the next, and a
//! failing task only reports through its own completion channel.

use sdk::errors::CarrierErrorExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::certify::list_certified_plugins;
use crate::deploy::PluginDeployer;
use crate::envelope::{CompletionSender, DeployOutcome, EnvConfigEnvelope};
use crate::secrets;

type PluginLists = Arc<RwLock<HashMap<String, Vec<String>>>>;

/// Owns the inbound queue and the per-environment plugin lists
pub struct Dispatcher {
    deployer: Arc<PluginDeployer>,
    inbound: mpsc::Receiver<EnvConfigEnvelope>,
    plugin_lists: PluginLists,
    bootstrapped: Arc<Mutex<HashSet<String>>>,
}

/// Submits work to a running dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    outbound: mpsc::Sender<EnvConfigEnvelope>,
    plugin_lists: PluginLists,
}

impl Dispatcher {
    /// Create a dispatcher with a queue of `capacity` envelopes.
    ///
    /// The dispatcher stops once every handle has been dropped and the
    /// queue is drained.
    pub fn new(deployer: Arc<PluginDeployer>, capacity: usize) -> (Self, DispatcherHandle) {
        let (outbound, inbound) = mpsc::channel(capacity.max(1));
        let plugin_lists = PluginLists::default();

        let dispatcher = Self {
            deployer,
            inbound,
            plugin_lists: Arc::clone(&plugin_lists),
            bootstrapped: Arc::default(),
        };
        let handle = DispatcherHandle {
            outbound,
            plugin_lists,
        };
        (dispatcher, handle)
    }

    /// Run the dispatcher on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume envelopes until the queue closes
    pub async fn run(mut self) {
        info!("Dispatcher started");
        while let Some(envelope) = self.inbound.recv().await {
            self.dispatch(envelope).await;
        }
        info!("Dispatcher stopped");
    }

    async fn dispatch(&mut self, mut envelope: EnvConfigEnvelope) {
        let completion = envelope.take_completion();

        if let Err(e) = envelope.validate() {
            warn!(env = %envelope.env, error = %e, "Dropping invalid envelope");
            complete(
                completion,
                DeployOutcome::Failed {
                    error: e.to_string(),
                },
            );
            return;
        }

        let work = envelope.fork();
        envelope.scrub();

        match work.plugin_name.clone() {
            None => self.dispatch_bootstrap(work, completion),
            Some(plugin) => self.dispatch_plugin(work, plugin, completion).await,
        }
    }

    fn dispatch_bootstrap(
        &mut self,
        envelope: EnvConfigEnvelope,
        completion: Option<CompletionSender>,
    ) {
        let env = envelope.env.clone();
        let claimed = envelope
            .bootstrap
            .as_ref()
            .map(|guard| guard.claim())
            .unwrap_or(false);
        let first_for_env = claimed && lock_set(&self.bootstrapped).insert(env.clone());

        if !first_for_env {
            debug!(env = %env, "Bootstrap already handled, dropping envelope");
            complete(
                completion,
                DeployOutcome::Rejected {
                    reason: format!("environment {} already bootstrapped", env),
                },
            );
            return;
        }

        let deployer = Arc::clone(&self.deployer);
        let plugin_lists = Arc::clone(&self.plugin_lists);
        let bootstrapped = Arc::clone(&self.bootstrapped);
        let span = info_span!("bootstrap", env = %env, task_id = %Uuid::new_v4());

        tokio::spawn(
            async move {
                let store = match deployer.certify_store(&envelope) {
                    Ok(store) => store,
                    Err(e) => {
                        bootstrap_failed(&bootstrapped, &envelope, e, completion);
                        return;
                    }
                };
                let namespace = deployer.settings().namespace.clone();

                let plugins = match list_certified_plugins(store.as_ref(), &namespace).await {
                    Ok(plugins) => plugins,
                    Err(e) => {
                        bootstrap_failed(&bootstrapped, &envelope, e, completion);
                        return;
                    }
                };

                info!(count = plugins.len(), "Environment bootstrapped");
                plugin_lists
                    .write()
                    .await
                    .insert(envelope.env.clone(), plugins.clone());

                for plugin in &plugins {
                    spawn_deploy(
                        Arc::clone(&deployer),
                        envelope.fork_for_plugin(plugin),
                        None,
                    );
                }

                complete(completion, DeployOutcome::Bootstrapped { plugins });
            }
            .instrument(span),
        );
    }

    async fn dispatch_plugin(
        &mut self,
        envelope: EnvConfigEnvelope,
        plugin: String,
        completion: Option<CompletionSender>,
    ) {
        let supported = self
            .plugin_lists
            .read()
            .await
            .get(&envelope.env)
            .map(|plugins| plugins.contains(&plugin))
            .unwrap_or(false);

        if !supported {
            warn!(env = %envelope.env, plugin = %plugin, "Unsupported plugin, skipping");
            complete(
                completion,
                DeployOutcome::Rejected {
                    reason: format!("{} is not a supported plugin in {}", plugin, envelope.env),
                },
            );
            return;
        }

        spawn_deploy(Arc::clone(&self.deployer), envelope, completion);
    }
}

impl DispatcherHandle {
    /// Queue an envelope. Waits while the queue is full.
    ///
    /// When the dispatcher has stopped the envelope is dropped and its
    /// completion channel reports [`DeployOutcome::Abandoned`].
    pub async fn submit(&self, envelope: EnvConfigEnvelope) -> bool {
        self.outbound.send(envelope).await.is_ok()
    }

    /// Queue an envelope and wait up to `deadline` for its outcome.
    ///
    /// The deadline covers time spent waiting for queue space as well as the
    /// deployment itself.
    pub async fn deploy_and_wait(
        &self,
        envelope: EnvConfigEnvelope,
        deadline: Duration,
    ) -> DeployOutcome {
        let expires = Instant::now() + deadline;
        let (envelope, completion) = envelope.with_completion();
        if tokio::time::timeout_at(expires, self.submit(envelope))
            .await
            .is_err()
        {
            return DeployOutcome::TimedOut;
        }
        completion
            .wait(expires.saturating_duration_since(Instant::now()))
            .await
    }

    /// Plugin list learned for `env` at bootstrap
    pub async fn known_plugins(&self, env: &str) -> Option<Vec<String>> {
        self.plugin_lists.read().await.get(env).cloned()
    }
}

fn spawn_deploy(
    deployer: Arc<PluginDeployer>,
    envelope: EnvConfigEnvelope,
    completion: Option<CompletionSender>,
) {
    let plugin = envelope.plugin_name.clone().unwrap_or_default();
    let span = info_span!(
        "deploy",
        env = %envelope.env,
        plugin = %plugin,
        task_id = %Uuid::new_v4()
    );

    tokio::spawn(
        async move {
            let outcome = match deployer.deploy(&envelope).await {
                Ok(outcome) => {
                    info!(outcome = %outcome, "Deployment finished");
                    outcome
                }
                Err(e) => {
                    let message = secrets::scrub(
                        &e.to_string(),
                        &[&envelope.vault.token, &envelope.certify.token],
                    );
                    error!(
                        error = %message,
                        hint = e.user_hint(),
                        recoverable = e.is_recoverable(),
                        "Deployment failed"
                    );
                    DeployOutcome::Failed { error: message }
                }
            };
            complete(completion, outcome);
        }
        .instrument(span),
    );
}

fn bootstrap_failed(
    bootstrapped: &Mutex<HashSet<String>>,
    envelope: &EnvConfigEnvelope,
    e: sdk::errors::CarrierError,
    completion: Option<CompletionSender>,
) {
    let message = secrets::scrub(&e.to_string(), &[&envelope.certify.token]);
    error!(error = %message, hint = e.user_hint(), "Bootstrap failed");
    lock_set(bootstrapped).remove(&envelope.env);
    complete(completion, DeployOutcome::Failed { error: message });
}

fn complete(completion: Option<CompletionSender>, outcome: DeployOutcome) {
    if let Some(sender) = completion {
        if !sender.send(outcome) {
            debug!("Completion receiver already gone");
        }
    }
}

fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
