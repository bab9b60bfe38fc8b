// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application context wiring the mapper together.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::ApiServer;
use crate::config::Config;
use crate::device::{DeviceContext, DeviceManager};
use crate::driver::DriverRegistry;
use crate::event::DeviceEvent;
use crate::sink::SinkSet;
use crate::sync::{SyncClient, SyncHandler, SyncServer, WireDevice, WireDeviceModel, convert};

/// How long the reporter keeps forwarding queued events after cancellation.
const REPORT_DRAIN: Duration = Duration::from_secs(3);

/// One mapper process: device manager, synchronization channel, HTTP API
/// and the background tasks tying them together.
///
/// Everything the mapper shares lives here and is handed to components
/// through their constructors.
///
/// # Examples
///
/// ```no_run
/// use edge_mapper::app::Mapper;
/// use edge_mapper::config::Config;
/// use edge_mapper::driver::DriverRegistry;
/// use edge_mapper::sink::SinkSet;
///
/// # async fn example() -> edge_mapper::Result<()> {
/// let config = Config::load("/etc/kubeedge/edge_mapper.yaml")?;
/// let mapper = Mapper::new(config, DriverRegistry::with_builtin(), SinkSet::new());
///
/// mapper.start().await?;
/// tokio::signal::ctrl_c().await?;
/// mapper.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Mapper {
    config: Config,
    manager: Arc<DeviceManager>,
    client: SyncClient,
    sinks: SinkSet,
    server: Mutex<Option<SyncServer>>,
    api: Mutex<Option<ApiServer>>,
    supervisor: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    reporter: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    shut_down: AtomicBool,
}

impl Mapper {
    /// Creates a mapper. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(config: Config, drivers: DriverRegistry, sinks: SinkSet) -> Self {
        let context = DeviceContext::new(config.device_settings()).with_sinks(sinks.clone());
        let manager = Arc::new(DeviceManager::new(drivers, context));
        let client = SyncClient::new(config.common.edgecore_sock.clone(), config.mapper_info());

        Self {
            config,
            manager,
            client,
            sinks,
            server: Mutex::new(None),
            api: Mutex::new(None),
            supervisor: Mutex::new(None),
            reporter: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the device manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<DeviceManager> {
        &self.manager
    }

    /// Returns the address of the HTTP API once started.
    #[must_use]
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api.lock().as_ref().map(ApiServer::local_addr)
    }

    /// Registers with the edge core, starts the devices it returns, then
    /// serves the synchronization socket and the HTTP API.
    ///
    /// Devices that cannot be built are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if registration fails or a socket cannot be bound.
    pub async fn start(&self) -> crate::Result<()> {
        let registration = &self.config.registration;
        let (devices, models) = self
            .client
            .register_with_backoff(
                registration.with_data,
                registration.attempts,
                Duration::from_millis(registration.initial_backoff_ms),
            )
            .await?;

        self.load(&devices, &models);

        let events = self.manager.subscribe();
        self.spawn_reporter(events);

        let started = self.manager.start_all().await;
        tracing::info!(started, total = self.manager.len(), "Initial devices started");

        let handler = SyncHandler::new(Arc::clone(&self.manager));
        let server = SyncServer::bind(&self.config.grpc_server.socket_path, handler)?;
        *self.server.lock() = Some(server);

        if self.config.common.http_port != 0 {
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.common.http_port));
            let api = ApiServer::bind(addr, Arc::clone(&self.manager)).await?;
            *self.api.lock() = Some(api);
        }

        self.spawn_supervisor();
        tracing::info!(mapper = %self.config.common.name, "Mapper started");
        Ok(())
    }

    fn load(&self, devices: &[WireDevice], models: &[WireDeviceModel]) {
        self.manager
            .load_models(models.iter().filter_map(|wire| match convert::device_model(wire) {
                Ok(model) => Some(model),
                Err(e) => {
                    tracing::warn!(model = %wire.name, error = %e, "Skipping device model");
                    None
                }
            }));

        for wire in devices {
            if let Err(e) = self.add_device(wire) {
                tracing::warn!(device = %wire.name, error = %e, "Skipping device");
            }
        }
    }

    fn add_device(&self, wire: &WireDevice) -> crate::Result<()> {
        let namespace = if wire.namespace.is_empty() {
            crate::model::ResourceId::DEFAULT_NAMESPACE
        } else {
            &wire.namespace
        };
        let model_id = crate::model::ResourceId::new(namespace, &wire.spec.device_model_reference);
        let model = self
            .manager
            .model(&model_id)
            .ok_or(crate::Error::ModelNotFound(model_id))?;
        let instance = convert::device_instance(wire, &model)?;
        let device = self.manager.build_device(model, instance)?;
        self.manager.add(device)?;
        Ok(())
    }

    fn spawn_reporter(&self, events: broadcast::Receiver<DeviceEvent>) {
        let token = CancellationToken::new();
        let task = tokio::spawn(report_events(events, self.client.clone(), token.clone()));
        *self.reporter.lock() = Some((token, task));
    }

    fn spawn_supervisor(&self) {
        let token = CancellationToken::new();
        let task = tokio::spawn(supervise(
            Arc::clone(&self.manager),
            self.config.health_interval(),
            token.clone(),
        ));
        *self.supervisor.lock() = Some((token, task));
    }

    /// Stops the synchronization server, the HTTP API, every device and the
    /// sinks, in that order. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Mapper shutting down");

        stop_task(self.supervisor.lock().take()).await;

        let server = self.server.lock().take();
        if let Some(server) = server {
            server.stop().await;
        }
        let api = self.api.lock().take();
        if let Some(api) = api {
            api.stop().await;
        }

        self.manager.shutdown().await;
        stop_task(self.reporter.lock().take()).await;
        self.sinks.close().await;

        tracing::info!("Mapper stopped");
    }
}

async fn stop_task(task: Option<(CancellationToken, JoinHandle<()>)>) {
    if let Some((token, handle)) = task {
        token.cancel();
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
}

/// Forwards status changes and reported twins to the edge core.
///
/// On cancellation, events already queued are still forwarded for up to
/// [`REPORT_DRAIN`], so the final status changes of a shutdown reach the core.
async fn report_events(
    mut events: broadcast::Receiver<DeviceEvent>,
    client: SyncClient,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = token.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => forward(&client, event).await,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Reporter lagged, events dropped");
            }
            Err(RecvError::Closed) => return,
        }
    }

    let drain = async {
        loop {
            match events.try_recv() {
                Ok(event) => forward(&client, event).await,
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Reporter lagged, events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(REPORT_DRAIN, drain).await.is_err() {
        tracing::warn!("Reporter drain timed out, remaining events dropped");
    }
}

async fn forward(client: &SyncClient, event: DeviceEvent) {
    let result = match event {
        DeviceEvent::TwinsReported { device_id, twins } => {
            client
                .report_status(device_id.namespace(), device_id.name(), &twins)
                .await
        }
        DeviceEvent::StatusChanged {
            device_id, current, ..
        } => {
            client
                .report_states(device_id.namespace(), device_id.name(), current.report_state())
                .await
        }
        _ => Ok(()),
    };

    if let Err(e) = result {
        tracing::warn!(error = %e, "Report to edge core failed");
    }
}

/// Runs health checks on every device at a fixed interval.
async fn supervise(manager: Arc<DeviceManager>, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => manager.health_check_all().await,
        }
    }
}
