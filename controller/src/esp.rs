use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals, rmt::RMT},
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    mdns::EspMdns,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use aircon_common::{
    AirconController, IrHardwareConfig, NetworkConfig, RuntimeConfig, SkillIntent,
    SkillParseError, SkillReply, StateUpdate, SKILL_COMMAND_TOPICS, TOPIC_SKILL_RESULT, TOPIC_STATE,
};

use crate::ir::IrTransmitter;

const INDEX_HTML: &str = include_str!("../web/index.html");
const NVS_NAMESPACE: &str = "aircon";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const MAX_HTTP_BODY: usize = 1024;
const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const STATE_PUBLISH_INTERVAL_MS: u64 = 10_000;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

type HttpRequest<'a, 'b> = Request<&'a mut EspHttpConnection<'b>>;

#[derive(Clone)]
struct SharedState {
    controller: Arc<Mutex<AirconController<IrTransmitter>>>,
    mqtt_connected: Arc<AtomicBool>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;

    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);

    info!(
        "config loaded: ssid=`{}`, hostname=`{}`, mqtt=`{}:{}`",
        runtime.network.wifi_ssid,
        runtime.network.hostname,
        runtime.network.mqtt_host,
        runtime.network.mqtt_port,
    );

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;
    let ir_sender = match init_ir_transmitter(rmt, &runtime.ir) {
        Ok(transmitter) => transmitter,
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled(runtime.ir.tx_pin)
        }
    };

    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &runtime.network) {
        Ok(wifi) => wifi,
        Err(err) => {
            warn!("wifi startup failed, restarting: {err:#}");
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
            esp_idf_svc::hal::reset::restart();
        }
    };

    let mdns = match start_mdns(&runtime) {
        Ok(mdns) => Some(mdns),
        Err(err) => {
            warn!("mDNS responder unavailable: {err:#}");
            None
        }
    };

    let shared_state = SharedState {
        controller: Arc::new(Mutex::new(AirconController::new(ir_sender))),
        mqtt_connected: Arc::new(AtomicBool::new(false)),
    };

    let (mqtt_client, mqtt_conn) = create_mqtt_client(&runtime.network)?;
    let mqtt_client = Arc::new(Mutex::new(mqtt_client));
    spawn_skill_receiver(shared_state.clone(), mqtt_conn, mqtt_client.clone())?;
    spawn_state_publisher(shared_state.clone(), mqtt_client)?;

    let server = create_http_server(shared_state, runtime.http.port)?;
    info!("HTTP server listening on port {}", runtime.http.port);

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _mdns = mdns;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn create_http_server(state: SharedState, port: u16) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: port,
        stack_size: 10 * 1024,
        uri_match_wildcard: true,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, |req| {
        req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
            .write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/state", Method::Get, move |req| {
            let payload = lock(&state.controller).payload();
            write_json(req, &payload)
        })?;
    }

    for method in [Method::Post, Method::Put] {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/state", method, move |req| {
            handle_state_update(&state, req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/api/ir/diagnostics", Method::Get, move |req| {
            let diagnostics = lock(&state.controller).backend().diagnostics();
            write_json(req, &diagnostics)
        })?;
    }

    for method in [Method::Get, Method::Post, Method::Put, Method::Delete] {
        server.fn_handler::<anyhow::Error, _>("/*", method, |req| {
            write_text(req, 404, "Not found")
        })?;
    }

    Ok(server)
}

fn handle_state_update(state: &SharedState, mut req: HttpRequest<'_, '_>) -> anyhow::Result<()> {
    let body = match read_request_body(&mut req) {
        Ok(body) => body,
        Err(err) => {
            warn!("rejecting state update: {err:#}");
            return write_text(req, 400, "Bad request");
        }
    };

    let document = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(document) => document,
        Err(err) => {
            warn!("rejecting state update with malformed body: {err}");
            return write_text(req, 400, "Bad request");
        }
    };

    let update = StateUpdate::from_value(document);
    let (candidate, summary) = {
        let mut controller = lock(&state.controller);
        let (candidate, _) = controller.apply_update(&update);
        (candidate, controller.state().to_string())
    };
    if candidate.is_empty() {
        info!("state update carried no applicable fields; re-sent {summary}");
    } else {
        info!("state updated: {summary}");
    }

    write_text(req, 200, "OK")
}

fn read_request_body(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: serde::Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_text(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "text/plain; charset=utf-8")],
    )?
    .write_all(message.as_bytes())?;
    Ok(())
}

fn init_ir_transmitter(rmt: RMT, ir: &IrHardwareConfig) -> anyhow::Result<IrTransmitter> {
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let carrier_khz = ir.carrier_khz;

    match ir.rmt_channel {
        0 => unsafe { IrTransmitter::new(rmt.channel0, AnyOutputPin::new(pin), pin, carrier_khz) },
        1 => unsafe { IrTransmitter::new(rmt.channel1, AnyOutputPin::new(pin), pin, carrier_khz) },
        2 => unsafe { IrTransmitter::new(rmt.channel2, AnyOutputPin::new(pin), pin, carrier_khz) },
        3 => unsafe { IrTransmitter::new(rmt.channel3, AnyOutputPin::new(pin), pin, carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { IrTransmitter::new(rmt.channel4, AnyOutputPin::new(pin), pin, carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { IrTransmitter::new(rmt.channel5, AnyOutputPin::new(pin), pin, carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { IrTransmitter::new(rmt.channel6, AnyOutputPin::new(pin), pin, carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { IrTransmitter::new(rmt.channel7, AnyOutputPin::new(pin), pin, carrier_khz) },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let ssid = network.wifi_ssid.trim();
    if ssid.is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    if let Err(err) = esp_wifi.sta_netif_mut().set_hostname(&network.hostname) {
        warn!("failed to set hostname `{}`: {err:?}", network.hostname);
    }

    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: ssid.try_into().map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{ssid}`");

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => Err(anyhow!(
            "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; last error: {err:#}"
        )),
    }
}

fn start_mdns(runtime: &RuntimeConfig) -> anyhow::Result<EspMdns> {
    let hostname = runtime.network.hostname.as_str();
    let mut mdns = EspMdns::take()?;
    mdns.set_hostname(hostname)?;
    mdns.set_instance_name(hostname)?;
    mdns.add_service(None, "_http", "_tcp", runtime.http.port, &[])?;
    info!("mDNS responder advertising {hostname}.local");
    Ok(mdns)
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some(network.hostname.as_str()),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    EspMqttClient::new(url.as_str(), &conf).context("failed to create cloud skill bridge client")
}

fn subscribe_topics(mqtt: &Mutex<EspMqttClient<'static>>) -> anyhow::Result<()> {
    let mut mqtt = lock(mqtt);
    for topic in SKILL_COMMAND_TOPICS {
        mqtt.subscribe(topic, QoS::AtLeastOnce)?;
    }
    Ok(())
}

fn spawn_skill_receiver(
    state: SharedState,
    mut conn: EspMqttConnection,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("skill-rx".into())
        .stack_size(12 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("cloud skill bridge connected");
                        state.mqtt_connected.store(true, Ordering::Relaxed);
                        if let Err(err) = subscribe_topics(&mqtt) {
                            warn!("skill topic subscription failed: {err:#}");
                        }
                    }
                    EventPayload::Disconnected => {
                        warn!("cloud skill bridge disconnected");
                        state.mqtt_connected.store(false, Ordering::Relaxed);
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        if !matches!(details, Details::Complete) {
                            continue;
                        }

                        if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized skill payload on topic {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            continue;
                        }

                        if let Ok(message) = core::str::from_utf8(data) {
                            if let Err(err) = handle_skill_message(&state, &mqtt, topic, message) {
                                warn!("skill message handling failed: {err:#}");
                            }
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    state.mqtt_connected.store(false, Ordering::Relaxed);
                    warn!("cloud skill bridge receive error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .context("failed to spawn skill receiver thread")?;
    Ok(())
}

fn spawn_state_publisher(
    state: SharedState,
    mqtt: Arc<Mutex<EspMqttClient<'static>>>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("state-pub".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            thread::sleep(Duration::from_millis(STATE_PUBLISH_INTERVAL_MS));
            if !state.mqtt_connected.load(Ordering::Relaxed) {
                continue;
            }
            if let Err(err) = publish_state(&state, &mqtt) {
                warn!("state publish failed: {err:#}");
            }
        })
        .context("failed to spawn state publisher thread")?;
    Ok(())
}

fn publish_state(state: &SharedState, mqtt: &Mutex<EspMqttClient<'static>>) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(&lock(&state.controller).payload())?;
    lock(mqtt).publish(TOPIC_STATE, QoS::AtLeastOnce, true, &payload)?;
    Ok(())
}

fn handle_skill_message(
    state: &SharedState,
    mqtt: &Mutex<EspMqttClient<'static>>,
    topic: &str,
    message: &str,
) -> anyhow::Result<()> {
    let (reply, accepted) = match SkillIntent::from_message(topic, message) {
        Ok(intent) => {
            let (result, summary) = {
                let mut controller = lock(&state.controller);
                let result = intent.apply(&mut controller);
                (result, controller.state().to_string())
            };
            match result {
                Ok(_) => {
                    info!("skill {} accepted: {summary}", intent.name());
                    (intent.reply(true), true)
                }
                Err(err) => {
                    warn!("skill {} rejected: {err}", intent.name());
                    (intent.reply(false), false)
                }
            }
        }
        Err(SkillParseError::UnknownTopic(_)) => return Ok(()),
        Err(err @ SkillParseError::InvalidPayload { intent, .. }) => {
            warn!("skill {intent} rejected: {err}");
            (
                SkillReply {
                    intent,
                    accepted: false,
                },
                false,
            )
        }
    };

    let body = serde_json::to_vec(&reply)?;
    lock(mqtt).publish(TOPIC_SKILL_RESULT, QoS::AtLeastOnce, false, &body)?;

    if accepted {
        publish_state(state, mqtt)?;
    }
    Ok(())
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 2048];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}
