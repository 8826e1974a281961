//! Orb node
//!
//! Owns every store and service of a witnessing node and wires them
//! together:
//!
//! - offers and proofs flow over the in-memory pub/sub through a
//!   redelivering [`Dispatcher`]
//! - the proof handler doubles as the anchor status store's policy handler
//! - background loops sweep in-process anchors and monitor logs

use ed25519_dalek::SigningKey;
use orb_core::{AnchorIndexStatus, Lifecycle, OrbError, State, Witness};
use orb_policy::{PolicyStore, WitnessPolicy};
use orb_pubsub::{Dispatcher, MemPubSub, Message, RedeliveryService};
use orb_storage::{AnchorStatusStore, ExpiryService, MemStoreProvider, WitnessProofStore};
use orb_vct::{ConsistencyMonitor, Ed25519Signer, HttpLogClientProvider, LogClientProvider, LogMonitorStore, VctWitness};
use orb_witness::{
    AcceptListManager, AnchorPublisher, OfferHandler, Outbox, ProofHandler, ProofMessage, StoreAcceptListManager,
    WitnessHandler, WitnessHandlerConfig, WitnessProvider, WITNESS_OFFER_TOPIC, WITNESS_PROOF_TOPIC,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::{mpsc, watch};

use crate::collaborators::{LocalOutbox, LoggingAnchorPublisher, StaticWitnessProvider};
use crate::config::NodeConfig;

/// External collaborators of a node
pub struct Collaborators {
    pub witnesses: Arc<dyn WitnessProvider>,
    pub publisher: Arc<dyn AnchorPublisher>,
    pub log_clients: Arc<dyn LogClientProvider>,
    /// Offer transport; the node witnesses its own offers when unset
    pub outbox: Option<Arc<dyn Outbox>>,
}

impl Collaborators {
    /// Collaborators derived from the configuration
    pub fn from_config(config: &NodeConfig) -> anyhow::Result<Self> {
        Ok(Self {
            witnesses: Arc::new(StaticWitnessProvider::new(config.witness.witnesses())),
            publisher: Arc::new(LoggingAnchorPublisher),
            log_clients: Arc::new(HttpLogClientProvider::new(config.vct.http_timeout())?),
            outbox: None,
        })
    }
}

/// Witnessing node
pub struct OrbNode {
    config: NodeConfig,
    lifecycle: Lifecycle,

    stores: Arc<MemStoreProvider>,
    expiry: ExpiryService,

    pubsub: Arc<MemPubSub>,
    redelivery: Arc<RedeliveryService>,
    due: Mutex<Option<mpsc::Receiver<Message>>>,
    dispatcher: Dispatcher,

    policy_store: Arc<PolicyStore>,
    status: Arc<AnchorStatusStore>,
    monitors: Arc<LogMonitorStore>,
    accept_list: Arc<dyn AcceptListManager>,
    monitor: ConsistencyMonitor,

    witness_handler: WitnessHandler,
    offer_handler: Arc<OfferHandler>,
    proof_handler: Arc<ProofHandler>,

    done: Mutex<Option<watch::Sender<bool>>>,
}

impl OrbNode {
    /// Create a node with the collaborators derived from `config`
    pub fn new(config: NodeConfig) -> anyhow::Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators)
    }

    pub fn with_collaborators(config: NodeConfig, collaborators: Collaborators) -> anyhow::Result<Self> {
        config.validate()?;

        let stores = Arc::new(MemStoreProvider::new());
        let expiry = ExpiryService::new(stores.clone(), config.storage.expiry_interval());

        let pubsub = Arc::new(MemPubSub::new(&config.node.name, config.pubsub.to_config()));
        let (redelivery, due) = RedeliveryService::new(config.redelivery.to_config());
        let redelivery = Arc::new(redelivery);
        let dispatcher = Dispatcher::new(pubsub.clone(), redelivery.clone());

        let policy_store = Arc::new(PolicyStore::new(stores.open_store("witness-policy")));
        let policy = Arc::new(WitnessPolicy::new(policy_store.clone()));
        let status_config = config.status.to_config();
        let proofs = Arc::new(WitnessProofStore::with_lifespan(
            stores.open_store("witness-proof"),
            status_config.status_lifespan(),
        ));
        let status = Arc::new(AnchorStatusStore::new(stores.open_store("anchor-status"), status_config));
        let monitors = Arc::new(LogMonitorStore::new(stores.open_store("log-monitor")));
        let accept_list: Arc<dyn AcceptListManager> =
            Arc::new(StoreAcceptListManager::new(stores.open_store("accept-list")));

        let monitor = ConsistencyMonitor::new(monitors.clone(), collaborators.log_clients.clone());

        let outbox = match collaborators.outbox {
            Some(outbox) => outbox,
            None => Arc::new(LocalOutbox::new(
                config.node.service_url.clone(),
                Arc::new(local_witness(&config, collaborators.log_clients.as_ref())?),
                pubsub.clone(),
            )),
        };

        let proof_handler = Arc::new(ProofHandler::new(
            status.clone(),
            proofs.clone(),
            policy.clone(),
            monitors.clone(),
            collaborators.publisher.clone(),
        ));
        status.set_policy_handler(proof_handler.clone());

        let witness_handler = WitnessHandler::new(
            WitnessHandlerConfig {
                enforce_accept_list: config.witness.enforce_accept_list,
            },
            policy,
            collaborators.witnesses,
            accept_list.clone(),
            proofs,
            status.clone(),
            pubsub.clone(),
            collaborators.publisher,
        );

        Ok(Self {
            lifecycle: Lifecycle::new(config.node.name.clone()),
            config,
            stores,
            expiry,
            pubsub,
            redelivery,
            due: Mutex::new(Some(due)),
            dispatcher,
            policy_store,
            status,
            monitors,
            accept_list,
            monitor,
            witness_handler,
            offer_handler: Arc::new(OfferHandler::new(outbox)),
            proof_handler,
            done: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Start every service and background loop. Must be called from within
    /// a tokio runtime; a stopped node cannot be restarted.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.lifecycle.state() != State::NotStarted {
            tracing::debug!(node = %self.config.node.name, "Node already started");
            return Ok(());
        }

        self.install_initial_policy().await?;

        if let Err(e) = self.monitor.recover().await {
            tracing::warn!(error = %e, "Failed to recover log monitors");
        }

        let Some(due) = self.due.lock().take() else {
            anyhow::bail!("node {} is already running", self.config.node.name);
        };

        self.lifecycle.start(|| {
            self.pubsub.start();
            self.redelivery.start();
            self.dispatcher.start(due);
            self.expiry.start();

            let (done_tx, done_rx) = watch::channel(false);
            *self.done.lock() = Some(done_tx);

            spawn_status_sweep(self.status.clone(), self.config.status.check_interval(), done_rx.clone());
            spawn_log_monitor(self.monitor.clone(), self.config.vct.monitoring_interval(), done_rx);
        });

        self.dispatcher.subscribe(WITNESS_OFFER_TOPIC, self.offer_handler.clone())?;
        self.dispatcher.subscribe(WITNESS_PROOF_TOPIC, self.proof_handler.clone())?;

        tracing::info!(
            node = %self.config.node.name,
            service_url = %self.config.node.service_url,
            "Orb node started"
        );
        Ok(())
    }

    /// Stop background loops and close pub/sub
    pub fn stop(&self) {
        let stopped = self.lifecycle.stop(|| {
            if let Some(done) = self.done.lock().take() {
                let _ = done.send(true);
            }

            self.expiry.stop();
            self.redelivery.stop();
            self.pubsub.stop();
        });

        if stopped {
            tracing::info!(node = %self.config.node.name, "Orb node stopped");
        }
    }

    /// Start, wait for Ctrl+C or SIGTERM, then stop
    pub async fn run(&self) -> anyhow::Result<()> {
        self.start().await?;
        wait_for_shutdown().await?;
        tracing::info!("Shutting down...");
        self.stop();
        Ok(())
    }

    async fn install_initial_policy(&self) -> anyhow::Result<()> {
        let Some(initial) = &self.config.policy.initial else {
            return Ok(());
        };

        if self.policy_store.get_policy().await?.is_empty() {
            self.policy_store.put_policy(initial).await?;
        }

        Ok(())
    }

    /// Start witnessing an anchor credential
    pub async fn witness_anchor(
        &self,
        anchor_id: &str,
        credential: &[u8],
        batch_witnesses: &[String],
    ) -> orb_core::Result<Vec<Witness>> {
        self.ensure_started()?;
        self.witness_handler
            .witness_anchor(anchor_id, credential, batch_witnesses)
            .await
    }

    /// Queue a proof received from a witness
    pub async fn receive_proof(&self, proof: &ProofMessage) -> orb_core::Result<()> {
        self.ensure_started()?;

        let payload = serde_json::to_vec(proof).map_err(|e| OrbError::Internal(format!("marshal proof: {e}")))?;

        self.pubsub
            .publish(WITNESS_PROOF_TOPIC, vec![Message::with_payload(payload)])
            .await
            .map_err(OrbError::from)
    }

    pub async fn anchor_status(&self, anchor_id: &str) -> orb_core::Result<AnchorIndexStatus> {
        self.status.get_status(anchor_id).await
    }

    /// Replace the witness policy
    pub async fn update_policy(&self, policy: &str) -> orb_core::Result<()> {
        self.policy_store.put_policy(policy).await
    }

    /// Current witness policy; empty when none was set
    pub async fn policy(&self) -> orb_core::Result<String> {
        self.policy_store.get_policy().await
    }

    pub fn accept_list(&self) -> &Arc<dyn AcceptListManager> {
        &self.accept_list
    }

    pub fn log_monitors(&self) -> &Arc<LogMonitorStore> {
        &self.monitors
    }

    pub fn stores(&self) -> &Arc<MemStoreProvider> {
        &self.stores
    }

    fn ensure_started(&self) -> orb_core::Result<()> {
        if self.lifecycle.is_started() {
            Ok(())
        } else {
            Err(OrbError::NotStarted(self.config.node.name.clone()))
        }
    }
}

impl Drop for OrbNode {
    fn drop(&mut self) {
        self.stop();
    }
}

fn local_witness(config: &NodeConfig, log_clients: &dyn LogClientProvider) -> anyhow::Result<VctWitness> {
    let verification_method = config.node.verification_method();

    let signer = match &config.node.signing_key {
        Some(secret) => Ed25519Signer::from_base64(secret, verification_method)?,
        None => {
            tracing::warn!("No signing key configured; generating an ephemeral key");
            Ed25519Signer::new(SigningKey::generate(&mut rand::rngs::OsRng), verification_method)
        }
    };
    let signer = Arc::new(signer);

    Ok(match &config.vct.log_url {
        Some(log_url) => VctWitness::with_log(signer, log_url.clone(), log_clients.client(log_url)?),
        None => VctWitness::new(signer),
    })
}

fn spawn_status_sweep(status: Arc<AnchorStatusStore>, interval: Duration, mut done: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = status.check_in_process_anchors().await {
                        tracing::warn!(error = %e, "In-process anchor sweep failed");
                    }
                }
                _ = done.changed() => break,
            }
        }

        tracing::debug!("Anchor status sweep exited");
    });
}

fn spawn_log_monitor(monitor: ConsistencyMonitor, interval: Duration, mut done: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = monitor.monitor_logs().await {
                        tracing::warn!(error = %e, "Log monitoring failed");
                    }
                }
                _ = done.changed() => break,
            }
        }

        tracing::debug!("Log monitor loop exited");
    });
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    Ok(())
}
