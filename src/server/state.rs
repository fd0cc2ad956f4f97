use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::{JwtValidator, TokenVerifier};
use crate::broker::Broker;
use crate::config::{MembershipBackend, Settings};
use crate::error::AppError;
use crate::events::{BusEvent, RawEvent, DOMAIN_STREAM};
use crate::hub::Hub;
use crate::hub_manager::HubManager;
use crate::membership::{connect_pool, ChannelResolver, MembershipDirectory, PostgresChannelResolver};
use crate::metrics::EventMetrics;
use crate::visibility::{FieldVisibility, Projector};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub broker: Arc<Broker<BusEvent>>,
    pub hub: Arc<Hub>,
    pub hub_manager: Arc<HubManager>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub resolver: Arc<dyn ChannelResolver>,
    pub projector: Arc<dyn Projector>,
    /// Set when memberships are served from memory; the message pump keeps it current
    pub directory: Option<Arc<MembershipDirectory>>,
    /// Root of every session's cancellation token
    pub shutdown: CancellationToken,
    pub start_time: Instant,
}

impl AppState {
    /// Build state from configuration, connecting to the database if the
    /// membership backend needs it.
    pub async fn new(settings: Settings) -> Result<Self, AppError> {
        match settings.membership.backend {
            MembershipBackend::Memory => {
                tracing::info!("Using in-memory membership directory");
                Ok(Self::with_directory(
                    settings,
                    Arc::new(MembershipDirectory::new()),
                ))
            }
            MembershipBackend::Postgres => {
                let pool = connect_pool(&settings.database).await?;
                let verifier = Arc::new(JwtValidator::new(&settings.jwt));
                let resolver = Arc::new(PostgresChannelResolver::new(pool));
                Ok(Self::with_collaborators(settings, verifier, resolver))
            }
        }
    }

    pub fn with_collaborators(
        settings: Settings,
        verifier: Arc<dyn TokenVerifier>,
        resolver: Arc<dyn ChannelResolver>,
    ) -> Self {
        let broker = Arc::new(Broker::new(&settings.broker));
        let hub = Arc::new(Hub::new());
        let hub_manager = Arc::new(HubManager::with_resolver(hub.clone(), resolver.clone()));

        Self {
            settings: Arc::new(settings),
            broker,
            hub,
            hub_manager,
            verifier,
            resolver,
            projector: Arc::new(FieldVisibility::default()),
            directory: None,
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
        }
    }

    /// State backed by an in-memory directory and JWT verification
    pub fn with_directory(settings: Settings, directory: Arc<MembershipDirectory>) -> Self {
        let verifier = Arc::new(JwtValidator::new(&settings.jwt));
        let mut state = Self::with_collaborators(settings, verifier, directory.clone());
        state.directory = Some(directory);
        state
    }

    /// Start the hub manager's pump on the domain stream
    pub async fn start_event_pump(&self) -> JoinHandle<()> {
        self.hub_manager.start(&self.broker).await
    }

    /// Decode an event at the bus boundary and publish it on the domain stream.
    ///
    /// Returns the number of subscriber queues it was placed on. Membership
    /// changes reach the resolver through the message pump, so a rejected
    /// publish leaves them untouched.
    pub async fn publish_event(&self, raw: RawEvent) -> Result<usize, AppError> {
        let name = raw.name.clone();
        let event = BusEvent::try_from(raw).map_err(|e| {
            tracing::warn!(event = %name, error = %e, "Rejected domain event");
            EventMetrics::record_rejected(&name);
            e
        })?;

        tracing::debug!(
            event = %event.name(),
            correlation_id = ?event.correlation_id(),
            "Publishing domain event"
        );
        Ok(self.broker.publish(DOMAIN_STREAM, event).await?)
    }
}
