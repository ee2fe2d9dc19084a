//! Operator control surface
//!
//! Line-delimited JSON over TCP. Each request line gets exactly one response
//! line. After a `subscribe` request the connection additionally receives
//! every [`FleetEvent`] as its own line.
//!
//! ```text
//! -> {"op":"connect","id":"minibot-a"}
//! <- {"ok":true,"data":{"id":"minibot-a",...}}
//! -> {"op":"set_override","active":true}
//! <- {"ok":true}
//! ```

use crate::error::FleetError;
use crate::events::FleetEvent;
use crate::fleet::FleetCore;
use crate::input::RawSample;
use crate::protocol::{ButtonBits, FleetMode};
use crate::scheduler::{wait_for_shutdown, ShutdownSignal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    ListRobots,
    RefreshRobots,
    GetRobot { id: String },
    Connect { id: String },
    Disconnect { id: String },
    EnableRobot { id: String },
    DisableRobot { id: String },
    SendMovement {
        id: String,
        axes: [f32; 4],
        #[serde(default)]
        buttons: u8,
    },
    SendStop { id: String },
    ListControllers,
    IngestSample { controller: String, sample: RawSample },
    RemoveController { controller: String },
    Pair { controller: String, robot: String },
    Unpair { controller: String },
    EnableController { controller: String },
    DisableController { controller: String },
    SetOverride { active: bool },
    SetFleetMode { mode: FleetMode },
    GetFleetMode,
    Stats,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            message: None,
            data: None,
        }
    }

    pub fn with_data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                message: None,
                data: Some(value),
            },
            Err(e) => Self::error(format!("cannot serialize response: {e}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            data: None,
        }
    }
}

impl From<FleetError> for ControlResponse {
    fn from(e: FleetError) -> Self {
        ControlResponse::error(e.to_string())
    }
}

fn respond<T: Serialize>(result: Result<T, FleetError>) -> ControlResponse {
    match result {
        Ok(data) => ControlResponse::with_data(&data),
        Err(e) => e.into(),
    }
}

fn acknowledge(result: Result<(), FleetError>) -> ControlResponse {
    match result {
        Ok(()) => ControlResponse::ok(),
        Err(e) => e.into(),
    }
}

/// Run one request against the core. `Subscribe` only acknowledges here; the
/// connection handler does the actual streaming.
pub fn execute(core: &mut FleetCore, request: ControlRequest) -> ControlResponse {
    let now = core.now_ms();
    match request {
        ControlRequest::ListRobots => ControlResponse::with_data(&core.list_robots()),
        ControlRequest::RefreshRobots => {
            core.refresh_robots(now);
            ControlResponse::ok()
        }
        ControlRequest::GetRobot { id } => respond(core.get_robot(&id)),
        ControlRequest::Connect { id } => respond(core.connect(&id, now)),
        ControlRequest::Disconnect { id } => respond(core.disconnect(&id, now)),
        ControlRequest::EnableRobot { id } => respond(core.set_robot_enabled(&id, true, now)),
        ControlRequest::DisableRobot { id } => respond(core.set_robot_enabled(&id, false, now)),
        ControlRequest::SendMovement { id, axes, buttons } => {
            acknowledge(core.send_movement(&id, axes, ButtonBits(buttons), now))
        }
        ControlRequest::SendStop { id } => acknowledge(core.send_stop(&id, now)),
        ControlRequest::ListControllers => ControlResponse::with_data(&core.list_controllers()),
        ControlRequest::IngestSample { controller, sample } => {
            acknowledge(core.ingest_sample(&controller, &sample, now).map(|_| ()))
        }
        ControlRequest::RemoveController { controller } => {
            respond(core.remove_controller(&controller, now))
        }
        ControlRequest::Pair { controller, robot } => acknowledge(core.pair(&controller, &robot, now)),
        ControlRequest::Unpair { controller } => acknowledge(core.unpair(&controller, now)),
        ControlRequest::EnableController { controller } => {
            respond(core.set_controller_enabled(&controller, true, now))
        }
        ControlRequest::DisableController { controller } => {
            respond(core.set_controller_enabled(&controller, false, now))
        }
        ControlRequest::SetOverride { active } => acknowledge(core.set_override(active, now)),
        ControlRequest::SetFleetMode { mode } => {
            core.set_fleet_mode(mode, now);
            ControlResponse::ok()
        }
        ControlRequest::GetFleetMode => ControlResponse::with_data(&core.fleet_mode()),
        ControlRequest::Stats => ControlResponse::with_data(&core.stats()),
        ControlRequest::Subscribe => ControlResponse::ok(),
    }
}

/// Accept operator connections until shutdown
pub async fn serve(listener: TcpListener, core: Arc<Mutex<FleetCore>>, mut shutdown: ShutdownSignal) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "control server listening"),
        Err(e) => warn!(error = %e, "control server address unavailable"),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(%addr, "operator connected");
                    let client_core = Arc::clone(&core);
                    let client_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, client_core, client_shutdown).await {
                            warn!(%addr, error = %e, "operator connection error");
                        }
                        info!(%addr, "operator disconnected");
                    });
                }
                Err(e) => error!(error = %e, "failed to accept operator connection"),
            },
            _ = wait_for_shutdown(&mut shutdown) => break,
        }
    }
    debug!("control server stopped");
}

async fn handle_client(
    stream: TcpStream,
    core: Arc<Mutex<FleetCore>>,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));
    let mut event_task: Option<tokio::task::JoinHandle<()>> = None;

    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            read = reader.read_line(&mut line) => read?,
            _ = wait_for_shutdown(&mut shutdown) => break,
        };
        if read == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<ControlRequest>(trimmed) {
            Ok(request) => {
                debug!(?request, "control request");
                let mut core = core.lock().await;
                if request == ControlRequest::Subscribe && event_task.is_none() {
                    event_task = Some(spawn_event_stream(core.subscribe(), Arc::clone(&writer)));
                    let subscribers = core.events().subscriber_count();
                    debug!(subscribers, "operator subscribed to events");
                }
                execute(&mut core, request)
            }
            Err(e) => {
                warn!(error = %e, "unparseable control request");
                ControlResponse::error(format!("invalid request: {e}"))
            }
        };

        write_line(&writer, &response).await?;
    }

    if let Some(task) = event_task {
        task.abort();
    }
    Ok(())
}

fn spawn_event_stream(
    mut events: broadcast::Receiver<FleetEvent>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = write_line(&writer, &event).await {
                        debug!(error = %e, "event stream closed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "operator too slow, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn write_line<T: Serialize>(writer: &Mutex<OwnedWriteHalf>, value: &T) -> std::io::Result<()> {
    let mut json = serde_json::to_string(value)?;
    json.push('\n');
    let mut writer = writer.lock().await;
    writer.write_all(json.as_bytes()).await
}
