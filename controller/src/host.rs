use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use flexstat_common::{
    ClimateStatus, EntityState, HeaterCommand, HvacMode, Reaction, RuntimeConfig,
    ThermostatConfig, ThermostatController, Topics,
};

use crate::store::AppStore;

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const HEATER_STATE_WAIT: Duration = Duration::from_secs(5);

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<ThermostatController>>,
    topics: Arc<Topics>,
    mqtt: AsyncClient,
    store: AppStore,
    gate: Arc<Mutex<StartupGate>>,
}

/// Sensor readings received before the heater's state is known are held
/// here, so the first reconcile sees the real heater state.
#[derive(Debug, Default)]
struct StartupGate {
    open: bool,
    held_reading: Option<EntityState>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();
    runtime
        .validate()
        .context("invalid thermostat configuration")?;

    let restored = store.load_snapshot().await.unwrap_or_else(|err| {
        warn!("failed to load previous state, starting fresh: {err:#}");
        None
    });

    let mut controller = ThermostatController::new(runtime.thermostat.clone());
    controller.on_start(restored.as_ref());

    let topics = Topics::new(&runtime.network.topic_prefix, controller.config());

    let mut mqtt_options = MqttOptions::new(
        "flexstat-controller",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        controller: Arc::new(Mutex::new(controller)),
        topics: Arc::new(topics),
        mqtt,
        store,
        gate: Arc::new(Mutex::new(StartupGate::default())),
    };

    subscribe_topics(&app_state).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_gate_timeout(app_state.clone());
    let status = app_state.controller.lock().await.status();
    publish_state(&app_state, &status);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/temperature", post(handle_set_temperature))
        .route("/api/turn_on", post(handle_turn_on))
        .route("/api/turn_off", post(handle_turn_off))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!(
        heater = %runtime.thermostat.heater,
        sensor = %runtime.thermostat.target_sensor,
        "controller listening on http://{addr}"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    persist_on_shutdown(&app_state).await?;
    info!("controller stopped");
    Ok(())
}

async fn persist_on_shutdown(app_state: &AppState) -> anyhow::Result<()> {
    let snapshot = app_state.controller.lock().await.snapshot();
    app_state
        .store
        .save_snapshot(&snapshot)
        .await
        .context("failed to persist state on shutdown")
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.network.mqtt_host = host;
    }
    if let Some(port) = env_port("MQTT_PORT") {
        runtime.network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.network.mqtt_pass = pass;
    }
    if let Some(port) = env_port("CONTROLLER_HTTP_PORT") {
        runtime.http_port = port;
    }
}

fn env_port(key: &str) -> Option<u16> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn subscribe_topics(app_state: &AppState) -> anyhow::Result<()> {
    for topic in app_state.topics.subscriptions() {
        app_state
            .mqtt
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .with_context(|| format!("failed to subscribe to {topic}"))?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_gate_timeout(app_state: AppState) {
    tokio::spawn(async move {
        tokio::time::sleep(HEATER_STATE_WAIT).await;
        if !app_state.gate.lock().await.open {
            warn!("no heater state after {HEATER_STATE_WAIT:?}, controlling without it");
        }
        open_gate(&app_state).await;
    });
}

/// Lets sensor readings through and replays the one held back, if any.
async fn open_gate(app_state: &AppState) {
    let mut gate = app_state.gate.lock().await;
    if gate.open {
        return;
    }
    gate.open = true;

    // Replayed with the gate still locked so a newer reading cannot overtake it.
    if let Some(reading) = gate.held_reading.take() {
        apply_event(app_state, |controller| {
            controller.on_sensor_update(Some(&reading))
        })
        .await;
    }
}

/// Runs one event through the controller and carries out its reaction.
///
/// Only the controller update happens under the lock. Everything the reaction
/// asks for runs after release, and publishing never waits on the MQTT queue.
async fn apply_event<F>(app_state: &AppState, event: F) -> Reaction
where
    F: FnOnce(&mut ThermostatController) -> Reaction,
{
    let (reaction, changed) = {
        let mut controller = app_state.controller.lock().await;
        let reaction = event(&mut *controller);
        let changed = reaction
            .notify
            .then(|| (controller.status(), controller.snapshot()));
        (reaction, changed)
    };

    if let Some(command) = reaction.command {
        dispatch_command(app_state, command);
    }

    if let Some((status, snapshot)) = changed {
        publish_state(app_state, &status);
        if let Err(err) = app_state.store.save_snapshot(&snapshot).await {
            warn!("failed to persist thermostat state: {err:#}");
        }
    }

    reaction
}

fn dispatch_command(app_state: &AppState, command: HeaterCommand) {
    info!(
        topic = %app_state.topics.heater_command,
        "calling switch.{}",
        command.service()
    );
    // Fire and forget: confirmation arrives later on the heater state topic.
    if let Err(err) = app_state.mqtt.try_publish(
        app_state.topics.heater_command.as_str(),
        QoS::AtLeastOnce,
        false,
        command.payload(),
    ) {
        warn!("heater command {command:?} not sent: {err}");
    }
}

fn publish_state(app_state: &AppState, status: &ClimateStatus) {
    match serde_json::to_vec(status) {
        Ok(body) => {
            if let Err(err) = app_state.mqtt.try_publish(
                app_state.topics.climate_state.as_str(),
                QoS::AtLeastOnce,
                true,
                body,
            ) {
                warn!("climate state publish failed: {err}");
            }
        }
        Err(err) => warn!("climate state serialization failed: {err}"),
    }
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let topics = &app_state.topics;

    if topic == topics.sensor_state {
        let new_state = EntityState::from_payload(&message);
        {
            let mut gate = app_state.gate.lock().await;
            if !gate.open {
                if let Some(state) = new_state {
                    debug!(
                        reading = state.as_str(),
                        "holding sensor reading until heater state is known"
                    );
                    gate.held_reading = Some(state);
                }
                return Ok(());
            }
        }
        apply_event(app_state, |controller| {
            controller.on_sensor_update(new_state.as_ref())
        })
        .await;
    } else if topic == topics.heater_state {
        let new_state = EntityState::from_payload(&message);
        apply_event(app_state, |controller| {
            controller.on_actuator_update(new_state.as_ref())
        })
        .await;
        if new_state.is_some() {
            open_gate(app_state).await;
        }
    } else if topic == topics.mode_command {
        apply_event(app_state, |controller| controller.set_mode(&message)).await;
    } else if topic == topics.temperature_command {
        let config = app_state.controller.lock().await.config().clone();
        let value = (!message.trim().is_empty()).then_some(message.as_str());
        match parse_target_request(&config, value) {
            Ok(target) => {
                apply_event(app_state, |controller| {
                    controller.set_target_temperature(target)
                })
                .await;
            }
            Err(reason) => warn!("ignoring temperature command {message:?}: {reason}"),
        }
    }

    Ok(())
}

/// Validates a requested setpoint the way a climate service would before the
/// request reaches the controller. `None` means no temperature was given.
fn parse_target_request(
    config: &ThermostatConfig,
    value: Option<&str>,
) -> Result<Option<f64>, String> {
    let Some(value) = value else {
        return Ok(None);
    };
    let target = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|target| target.is_finite())
        .ok_or_else(|| "Invalid temperature value".to_string())?;

    if !config.target_in_range(target) {
        return Err(format!(
            "Temperature {target} out of range ({}-{})",
            config.min_temp, config.max_temp
        ));
    }
    Ok(Some(target))
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.controller.lock().await.status();
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let reaction = apply_event(&state, |controller| controller.set_mode(value)).await;
    reaction_response(state, reaction).await
}

async fn handle_set_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let config = state.controller.lock().await.config().clone();
    let target = match parse_target_request(&config, params.get("value").map(String::as_str)) {
        Ok(target) => target,
        Err(reason) => return error_response(StatusCode::BAD_REQUEST, &reason),
    };

    let reaction = apply_event(&state, |controller| {
        controller.set_target_temperature(target)
    })
    .await;
    reaction_response(state, reaction).await
}

async fn handle_turn_on(State(state): State<AppState>) -> impl IntoResponse {
    let reaction = apply_event(&state, |controller| {
        controller.set_hvac_mode(HvacMode::Heat)
    })
    .await;
    reaction_response(state, reaction).await
}

async fn handle_turn_off(State(state): State<AppState>) -> impl IntoResponse {
    let reaction = apply_event(&state, |controller| {
        controller.set_hvac_mode(HvacMode::Off)
    })
    .await;
    reaction_response(state, reaction).await
}

async fn reaction_response(state: AppState, reaction: Reaction) -> axum::response::Response {
    if let Some(fault) = reaction.fault {
        return error_response(StatusCode::BAD_REQUEST, &fault.to_string());
    }
    handle_get_status(State(state)).await.into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
