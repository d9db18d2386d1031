use std::{io::ErrorKind, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use tokio::sync::Mutex;
use tracing::{info, warn};

use flexstat_common::{RuntimeConfig, Topics, STATE_UNAVAILABLE};

use crate::room::{Room, Switch};

const SWITCH_DELAY: Duration = Duration::from_millis(500);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config, using defaults: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    let topics = Arc::new(Topics::new(
        &runtime.network.topic_prefix,
        &runtime.thermostat,
    ));

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("flexstat-simulator", mqtt_host, mqtt_port);
    if let Ok(user) = std::env::var("MQTT_USER") {
        let pass = std::env::var("MQTT_PASS").unwrap_or_default();
        mqtt_options.set_credentials(user, pass);
    }

    let (mqtt, mut eventloop) = AsyncClient::new(mqtt_options, 32);
    let switch = Arc::new(Mutex::new(Switch::default()));

    mqtt.subscribe(topics.heater_command.as_str(), QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to heater commands")?;
    mqtt.publish(
        topics.heater_state.as_str(),
        QoS::AtLeastOnce,
        true,
        switch.lock().await.state(),
    )
    .await
    .context("failed to publish initial heater state")?;

    {
        let mqtt = mqtt.clone();
        let switch = switch.clone();
        let topics = topics.clone();
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::Publish(message)))
                        if message.topic == topics.heater_command =>
                    {
                        let payload = String::from_utf8_lossy(&message.payload).into_owned();
                        spawn_switch_command(mqtt.clone(), switch.clone(), topics.clone(), payload);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("simulator mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });
    }

    let period = std::env::var("SIM_PERIOD_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(5);
    let dropout_every = std::env::var("SIM_DROPOUT_EVERY")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|n| *n > 0);

    info!(
        sensor = %topics.sensor_state,
        heater = %topics.heater_command,
        "simulator started"
    );

    let mut room = Room::default();
    let mut tick: u64 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(period));

    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        let heater_on = switch.lock().await.is_on();
        room.step(period as f64, heater_on);

        let payload = match dropout_every {
            Some(n) if tick % n == 0 => STATE_UNAVAILABLE.to_string(),
            _ => room.reading(),
        };

        mqtt.publish(topics.sensor_state.as_str(), QoS::AtLeastOnce, true, payload)
            .await
            .context("failed to publish sensor reading")?;
    }
}

fn spawn_switch_command(
    mqtt: AsyncClient,
    switch: Arc<Mutex<Switch>>,
    topics: Arc<Topics>,
    payload: String,
) {
    tokio::spawn(async move {
        tokio::time::sleep(SWITCH_DELAY).await;

        let echo = switch.lock().await.apply(&payload);
        let Some(state) = echo else {
            warn!("switch ignored command {payload:?}");
            return;
        };

        info!("heater switched {state}");
        if let Err(err) = mqtt
            .publish(topics.heater_state.as_str(), QoS::AtLeastOnce, true, state)
            .await
        {
            warn!("heater state publish failed: {err}");
        }
    });
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let path = std::env::var("FLEXSTAT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.flexstat"))
        .join("runtime.json");

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice(&raw)
            .with_context(|| format!("malformed config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}
