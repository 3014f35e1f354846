//! The convergence engine. One handler runs to completion per event; the
//! state it owns is handed out only as snapshots.

use std::sync::Arc;

use glk_core::{
    Announcer, ConnectionFacts, Event, FetchError, ImageDescriptor, IntegrationError, Leadership, NotLeader, PodSpec,
    ReconcilerState, RelationStore, ResourceStore, SpecApplier, Status, StoreError,
};
use glk_relation::{HttpProvider, RelationReader};
use glk_resource::ResourceFetcher;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::arbiter::{Arbiter, Findings};
use crate::config::ReconcilerConfig;

/// The host-owned collaborators the reconciler talks to.
#[derive(Clone)]
pub struct Host {
    pub relations: Arc<dyn RelationStore>,
    pub resources: Arc<dyn ResourceStore>,
    pub leadership: Arc<dyn Leadership>,
    pub applier: Arc<dyn SpecApplier>,
    pub announcer: Arc<dyn Announcer>,
}

/// What the event-delivery side should do with an event after handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    /// Re-queue and redeliver after a future convergence.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// A prerequisite is missing; nothing was reported.
    Skipped,
    NotLeader,
    Failed,
    Converged,
}

pub struct Reconciler {
    config: ReconcilerConfig,
    arbiter: Arbiter,
    reader: RelationReader,
    fetcher: ResourceFetcher,
    http: HttpProvider,
    host: Host,
    state: ReconcilerState,
    status: Status,
    initialized: bool,
    // last fetch failure in this process; not persisted
    image_error: Option<FetchError>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig, host: Host) -> Self {
        Self::restore(config, host, ReconcilerState::default(), Status::default())
    }

    /// Resume from persisted state and the last reported status.
    pub fn restore(config: ReconcilerConfig, host: Host, state: ReconcilerState, status: Status) -> Self {
        Self {
            arbiter: Arbiter::new(config.precedence, config.database_endpoint.clone()),
            reader: RelationReader::new(config.database_endpoint.clone()),
            fetcher: ResourceFetcher::new(config.image_resource.clone()),
            http: HttpProvider::new(config.website_endpoint.clone()),
            config,
            host,
            state,
            status,
            initialized: false,
            image_error: None,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig { &self.config }
    pub fn state(&self) -> &ReconcilerState { &self.state }
    pub fn status(&self) -> &Status { &self.status }
    pub fn generation(&self) -> u64 { self.state.generation }

    /// The spec the current state would converge to, if both prerequisites are present.
    pub fn render(&self) -> Option<PodSpec> {
        match (self.state.has_image, &self.state.image, &self.state.database) {
            (true, Some(img), Some(db)) => Some(PodSpec::build(&self.config.app_name, self.config.http_port, img, db)),
            _ => None,
        }
    }

    pub async fn handle(&mut self, event: &Event) -> Outcome {
        counter!("reconcile_events_total", 1u64);
        self.initialize();
        debug!(event = event.name(), "handling event");
        match event {
            Event::Start | Event::ConfigChanged | Event::LeaderElected => self.refresh(false).await,
            Event::UpgradeCharm => self.refresh(true).await,
            Event::UpdateStatus => self.assess().await,
            Event::ImageAvailable => match self.fetcher.fetch(&*self.host.resources) {
                Ok(img) => self.on_image_available(img).await,
                Err(e) => self.on_image_failed(e),
            },
            Event::ImageFailed { reason } => self.on_image_failed(StoreError(reason.clone()).into()),
            Event::DatabaseRelationJoined | Event::DatabaseRelationChanged => {
                match self.reader.read(&*self.host.relations) {
                    Ok(facts) => self.on_database_available(facts).await,
                    Err(e) => self.on_database_unavailable(e).await,
                }
            }
            Event::DatabaseRelationBroken => self.on_database_unavailable(IntegrationError::NotJoined).await,
            Event::WebsiteRelationJoined { .. } => return self.on_endpoint_requested(),
        }
        Outcome::Handled
    }

    /// Re-entrant. Zeroes whatever persisted fields cannot hold together, so a
    /// started flag never survives without the inputs it converged from.
    pub fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        if self.state.has_image && self.state.image.is_none() {
            self.state.has_image = false;
        }
        if self.state.is_started && !self.state.is_ready() {
            warn!("persisted state marked started without image and database; resetting");
            self.state.is_started = false;
        }
        self.initialized = true;
    }

    /// Converges with whatever database facts are already held; the database
    /// side reports its own absence.
    pub async fn on_image_available(&mut self, image: ImageDescriptor) {
        self.image_error = None;
        if self.state.is_started && self.status.is_active() && self.state.image.as_ref() == Some(&image) {
            debug!(image = %image.registry_path, "image unchanged since last convergence");
            return;
        }
        info!(image = %image.registry_path, "image resource available");
        self.state.image = Some(image);
        self.state.has_image = true;
        self.converge().await;
    }

    pub fn on_image_failed(&mut self, err: FetchError) {
        warn!(error = %err, "image resource unavailable");
        self.state.has_image = false;
        self.state.image = None;
        let findings = Findings { image: Some(&err), leadership: self.leadership(), ..Default::default() };
        if let Some(st) = self.arbiter.arbitrate(&findings) {
            self.set_status(st);
        }
        self.image_error = Some(err);
    }

    /// A "changed" event is handled exactly like first availability.
    pub async fn on_database_available(&mut self, facts: ConnectionFacts) {
        info!(host = %facts.host, port = facts.port, database = %facts.database, "database available");
        self.state.database = Some(facts);
        let image = if self.state.has_image { None } else { self.adopt_image().err() };
        self.settle(image, None).await;
    }

    pub async fn on_database_unavailable(&mut self, err: IntegrationError) {
        debug!(error = %err, "database unavailable");
        self.state.database = None;
        let image = if self.state.has_image { None } else { self.adopt_image().err() };
        self.settle(image, Some(err)).await;
    }

    /// Announce the endpoint, or defer until the workload has converged once.
    pub fn on_endpoint_requested(&mut self) -> Outcome {
        if !self.state.is_started {
            counter!("reconcile_deferred_total", 1u64);
            debug!("endpoint requested before workload started; deferring");
            return Outcome::Deferred;
        }
        self.announce_all();
        Outcome::Handled
    }

    /// Build and apply the spec once image and database are both present.
    /// Missing prerequisites make this a silent no-op.
    pub async fn converge(&mut self) -> Convergence {
        let Some(spec) = self.render() else {
            debug!(has_image = self.state.has_image, has_database = self.state.database.is_some(), "convergence skipped");
            return Convergence::Skipped;
        };
        if let Some(not_leader) = self.leadership() {
            let findings = Findings { leadership: Some(not_leader), ..Default::default() };
            if let Some(st) = self.arbiter.arbitrate(&findings) {
                self.set_status(st);
            }
            return Convergence::NotLeader;
        }

        self.set_status(Status::maintenance("Configuring container"));
        if let Err(e) = self.host.applier.apply_spec(&spec).await {
            warn!(error = %e, "pod spec rejected");
            self.set_status(Status::blocked(format!("Failed to apply pod spec: {}", e)));
            return Convergence::Failed;
        }

        self.state.is_started = true;
        self.state.generation = self.state.generation.saturating_add(1);
        counter!("reconcile_converged_total", 1u64);
        info!(generation = self.state.generation, port = self.config.http_port, "workload converged");
        self.set_status(Status::Active);
        self.announce_all();
        Convergence::Converged
    }

    /// Lifecycle events: pick up whatever is still missing, then converge or report.
    async fn refresh(&mut self, refetch_image: bool) {
        let image = if refetch_image || !self.state.has_image { self.adopt_image().err() } else { None };
        let database = if self.state.database.is_none() { self.adopt_database().err() } else { None };
        self.settle(image, database).await;
    }

    /// Periodic check. A started workload is only re-reported, never re-applied.
    async fn assess(&mut self) {
        if !self.state.is_started {
            return self.refresh(false).await;
        }
        let database = self.reader.read(&*self.host.relations).err();
        let findings = Findings {
            image: if self.state.has_image { None } else { self.image_error.as_ref() },
            database: database.as_ref(),
            leadership: self.leadership(),
        };
        let st = self.arbiter.arbitrate(&findings).unwrap_or(Status::Active);
        self.set_status(st);
    }

    async fn settle(&mut self, image: Option<FetchError>, database: Option<IntegrationError>) {
        if image.is_none() && database.is_none() {
            self.converge().await;
            return;
        }
        let findings = Findings { image: image.as_ref(), database: database.as_ref(), leadership: self.leadership() };
        if let Some(st) = self.arbiter.arbitrate(&findings) {
            self.set_status(st);
        }
    }

    fn adopt_image(&mut self) -> Result<(), FetchError> {
        match self.fetcher.fetch(&*self.host.resources) {
            Ok(img) => {
                self.state.image = Some(img);
                self.state.has_image = true;
                self.image_error = None;
                Ok(())
            }
            Err(e) => {
                self.state.has_image = false;
                self.state.image = None;
                self.image_error = Some(e.clone());
                Err(e)
            }
        }
    }

    fn adopt_database(&mut self) -> Result<(), IntegrationError> {
        let facts = self.reader.read(&*self.host.relations)?;
        self.state.database = Some(facts);
        Ok(())
    }

    fn leadership(&self) -> Option<NotLeader> {
        if self.host.leadership.is_leader() { None } else { Some(NotLeader) }
    }

    fn announce_all(&self) {
        let port = self.config.http_port;
        for client in self.http.clients(&*self.host.relations) {
            let host = self.config.external_hostname.as_deref().or(client.ingress_address.as_deref());
            match host {
                Some(host) => {
                    debug!(relation = client.relation.id, host, port, "announcing endpoint");
                    self.host.announcer.announce(&client.relation, host, port);
                }
                None => warn!(relation = client.relation.id, "no ingress address for client; not announcing"),
            }
        }
    }

    fn set_status(&mut self, status: Status) {
        if self.status != status {
            info!(status = %status, "status changed");
            self.status = status;
        }
    }
}
