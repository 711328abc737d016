use super::types::{ComponentState, ShutdownReason};
use crate::camera::{CameraClientBuilder, CameraTransport, ResilientCameraClient};
use crate::config::GopilotConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::infrastructure::AuditLog;
use crate::keyboard_input::KeyboardInputHandler;
use crate::planner::{IntentPlanner, KeywordPlanner};
use crate::session::{ReadinessThresholds, SessionStateMachine};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

const EVENT_BUS_CAPACITY: usize = 64;

/// Wires configuration, camera client, audit log, state machine and runner
pub struct VloggerOrchestrator {
    pub(super) config: GopilotConfig,
    pub(super) client: Arc<ResilientCameraClient>,
    pub(super) machine: Arc<SessionStateMachine>,
    pub(super) event_bus: EventBus,
    pub(super) planner: Arc<dyn IntentPlanner>,

    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_reason: Arc<Mutex<Option<ShutdownReason>>>,
    pub(super) cancellation_token: CancellationToken,
}

impl VloggerOrchestrator {
    /// Orchestrator talking to the camera over HTTP
    pub async fn new(config: GopilotConfig) -> Result<Self> {
        let client = CameraClientBuilder::new().config(config.clone()).build()?;
        Self::with_client(config, client).await
    }

    /// Orchestrator over a custom transport (mock camera, dry runs)
    pub async fn with_transport(
        config: GopilotConfig,
        transport: Arc<dyn CameraTransport>,
    ) -> Result<Self> {
        let client = CameraClientBuilder::new()
            .config(config.clone())
            .transport(transport)
            .build()?;
        Self::with_client(config, client).await
    }

    async fn with_client(config: GopilotConfig, client: ResilientCameraClient) -> Result<Self> {
        let client = Arc::new(client);
        let audit = Arc::new(AuditLog::open(&config.session.audit_path).await?);
        let event_bus = EventBus::new(EVENT_BUS_CAPACITY);

        let machine = SessionStateMachine::new(
            Arc::clone(&client),
            audit,
            ReadinessThresholds::from(&config.readiness),
            config.session.stop_failure_policy,
        )
        .with_events(event_bus.clone());

        info!(
            "Orchestrator ready (audit log {})",
            config.session.audit_path.display()
        );

        Ok(Self {
            config,
            client,
            machine: Arc::new(machine),
            event_bus,
            planner: Arc::new(KeywordPlanner::new()),
            keyboard_handler: None,
            keyboard_enabled: false,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_reason: Arc::new(Mutex::new(None)),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Enable or disable keyboard controls for the next session
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    /// Replace the default keyword planner
    pub fn set_planner(&mut self, planner: Arc<dyn IntentPlanner>) {
        self.planner = planner;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn machine(&self) -> Arc<SessionStateMachine> {
        Arc::clone(&self.machine)
    }

    pub fn client(&self) -> Arc<ResilientCameraClient> {
        Arc::clone(&self.client)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn shutdown_reason(&self) -> Option<ShutdownReason> {
        self.shutdown_reason.lock().await.clone()
    }
}
