use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    handler::HandlerWithoutStateExt,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::services::ServeDir;
use tracing::{info, warn};

use aircon_common::{
    AirconController, HitachiFrame, IrBackend, IrHardwareConfig, RuntimeConfig, SkillIntent,
    SkillParseError, SkillReply, StatePayload, StateUpdate, SKILL_COMMAND_TOPICS,
    TOPIC_SKILL_RESULT, TOPIC_STATE,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const INDEX_HTML: &str = include_str!("../web/index.html");
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<AirconController<LoggingIrBackend>>>,
}

/// Development stand-in for the IR LED: frames are logged and counted.
#[derive(Debug)]
struct LoggingIrBackend {
    tx_pin: i32,
    carrier_khz: u32,
    sent_frames: u64,
    last_frame: Option<String>,
}

#[derive(Debug, Serialize)]
struct IrDiagnosticsView {
    enabled: bool,
    #[serde(rename = "txPin")]
    tx_pin: i32,
    #[serde(rename = "carrierKHz")]
    carrier_khz: u32,
    #[serde(rename = "sentFrames")]
    sent_frames: u64,
    #[serde(rename = "lastFrame")]
    last_frame: Option<String>,
    #[serde(rename = "lastError")]
    last_error: Option<String>,
}

/// Outcome of one skill message: the reply for the assistant and, when the
/// command went through, the state to report.
#[derive(Debug)]
struct SkillOutcome {
    reply: SkillReply,
    state: Option<StatePayload>,
}

impl AppState {
    fn new(backend: LoggingIrBackend) -> Self {
        Self {
            controller: Arc::new(Mutex::new(AirconController::new(backend))),
        }
    }
}

impl LoggingIrBackend {
    fn new(ir: &IrHardwareConfig) -> Self {
        Self {
            tx_pin: ir.tx_pin,
            carrier_khz: ir.carrier_khz,
            sent_frames: 0,
            last_frame: None,
        }
    }
}

impl IrBackend for LoggingIrBackend {
    fn transmit(&mut self, frame: &HitachiFrame) {
        let hex = frame.to_hex();
        info!(
            power = frame.power(),
            timings = frame.raw_timings().len(),
            "IR frame [{hex}]"
        );
        self.sent_frames = self.sent_frames.saturating_add(1);
        self.last_frame = Some(hex);
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut runtime = load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let app_state = AppState::new(LoggingIrBackend::new(&runtime.ir));

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.network.mqtt_host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.mqtt_port);

    let mut mqtt_options =
        MqttOptions::new(runtime.network.hostname.clone(), mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.network.mqtt_user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.network.mqtt_pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    spawn_skill_loop(app_state.clone(), mqtt.clone(), eventloop);
    spawn_state_publish_loop(app_state.clone(), mqtt);

    let web_root = std::env::var("AIRCON_WEB_ROOT").ok().map(PathBuf::from);
    let app = router(app_state, web_root);

    let port = std::env::var("AIRCON_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.http.port);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(app_state: AppState, web_root: Option<PathBuf>) -> Router {
    let router = Router::new()
        .route(
            "/state",
            get(handle_get_state)
                .post(handle_put_state)
                .put(handle_put_state)
                .fallback(handle_not_found),
        )
        .route("/api/ir/diagnostics", get(handle_get_ir_diagnostics));

    let router = match web_root {
        Some(root) => router.fallback_service(
            ServeDir::new(root)
                .call_fallback_on_method_not_allowed(true)
                .not_found_service(handle_not_found.into_service()),
        ),
        None => router
            .route("/", get(handle_index))
            .fallback(handle_not_found),
    };

    router.with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn spawn_skill_loop(app_state: AppState, mqtt: AsyncClient, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_skill_message(&app_state, &mqtt, &message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("skill message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("cloud skill bridge connected");
                    if let Err(err) = subscribe_topics(&mqtt).await {
                        warn!("skill topic subscription failed: {err:#}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("cloud skill bridge disconnected: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in SKILL_COMMAND_TOPICS {
        mqtt.subscribe(topic, QoS::AtLeastOnce).await?;
    }
    Ok(())
}

fn spawn_state_publish_loop(app_state: AppState, mqtt: AsyncClient) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            interval.tick().await;
            let payload = app_state.controller.lock().await.payload();
            if let Err(err) = publish_state(&mqtt, &payload).await {
                warn!("state publish failed: {err:#}");
            }
        }
    });
}

async fn publish_state(mqtt: &AsyncClient, payload: &StatePayload) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    mqtt.publish(TOPIC_STATE, QoS::AtLeastOnce, true, body).await?;
    Ok(())
}

async fn handle_skill_message(
    app_state: &AppState,
    mqtt: &AsyncClient,
    topic: &str,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized skill payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 skill payload")?;
    let Some(outcome) = process_skill_message(app_state, topic, &message).await else {
        return Ok(());
    };

    let reply = serde_json::to_vec(&outcome.reply)?;
    mqtt.publish(TOPIC_SKILL_RESULT, QoS::AtLeastOnce, false, reply)
        .await?;

    if let Some(state) = outcome.state {
        publish_state(mqtt, &state).await?;
    }
    Ok(())
}

async fn process_skill_message(
    app_state: &AppState,
    topic: &str,
    message: &str,
) -> Option<SkillOutcome> {
    let intent = match SkillIntent::from_message(topic, message) {
        Ok(intent) => intent,
        Err(SkillParseError::UnknownTopic(_)) => return None,
        Err(err @ SkillParseError::InvalidPayload { intent, .. }) => {
            warn!("skill {intent} rejected: {err}");
            return Some(SkillOutcome {
                reply: SkillReply {
                    intent,
                    accepted: false,
                },
                state: None,
            });
        }
    };

    let (result, state, summary) = {
        let mut controller = app_state.controller.lock().await;
        let result = intent.apply(&mut controller);
        (result, controller.payload(), controller.state().to_string())
    };

    match result {
        Ok(_) => {
            info!("skill {} accepted: {summary}", intent.name());
            Some(SkillOutcome {
                reply: intent.reply(true),
                state: Some(state),
            })
        }
        Err(err) => {
            warn!("skill {} rejected: {err}", intent.name());
            Some(SkillOutcome {
                reply: intent.reply(false),
                state: None,
            })
        }
    }
}

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn handle_get_state(State(state): State<AppState>) -> impl IntoResponse {
    let payload = state.controller.lock().await.payload();
    Json(payload)
}

async fn handle_put_state(State(state): State<AppState>, body: Bytes) -> Response {
    let document = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(document) => document,
        Err(err) => {
            warn!("rejecting state update with malformed body: {err}");
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    let update = StateUpdate::from_value(document);
    let (candidate, summary) = {
        let mut controller = state.controller.lock().await;
        let (candidate, _) = controller.apply_update(&update);
        (candidate, controller.state().to_string())
    };
    if candidate.is_empty() {
        info!("state update carried no applicable fields; re-sent {summary}");
    } else {
        info!("state updated: {summary}");
    }

    (StatusCode::OK, "OK").into_response()
}

async fn handle_get_ir_diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let controller = state.controller.lock().await;
    let backend = controller.backend();
    Json(IrDiagnosticsView {
        enabled: false,
        tx_pin: backend.tx_pin,
        carrier_khz: backend.carrier_khz,
        sent_frames: backend.sent_frames,
        last_frame: backend.last_frame.clone(),
        last_error: Some("IR transmission is only available in ESP32 builds".to_string()),
    })
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

async fn load_runtime_config() -> anyhow::Result<RuntimeConfig> {
    let data_dir = std::env::var("AIRCON_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.aircon"));
    let path = data_dir.join("runtime.json");

    match tokio::fs::read(&path).await {
        Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw)
            .with_context(|| format!("invalid runtime config at {}", path.display())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request},
    };
    use tower::ServiceExt;

    use aircon_common::{
        AcMode, TOPIC_SKILL_FAN, TOPIC_SKILL_FAN_ADJUST, TOPIC_SKILL_MODE,
        TOPIC_SKILL_TARGET_ADJUST,
    };

    use super::*;

    fn test_state() -> AppState {
        AppState::new(LoggingIrBackend::new(&IrHardwareConfig::default()))
    }

    async fn send(app: Router, method: Method, uri: &str, body: &'static str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn get_state_reports_defaults() {
        let app = router(test_state(), None);
        let (status, body) = send(app, Method::GET, "/state", "").await;

        assert_eq!(status, StatusCode::OK);
        let payload: StatePayload = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            payload,
            StatePayload {
                power: false,
                swing: false,
                temp: 25,
                mode: 1,
                fan: 0,
            }
        );
    }

    #[tokio::test]
    async fn post_state_clamps_and_acknowledges() {
        let state = test_state();
        let (status, body) = send(
            router(state.clone(), None),
            Method::POST,
            "/state",
            r#"{"power":true,"temp":40,"mode":2,"fan":3,"swing":true}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");

        let controller = state.controller.lock().await;
        assert_eq!(
            controller.payload(),
            StatePayload {
                power: true,
                swing: true,
                temp: 32,
                mode: 2,
                fan: 3,
            }
        );
        assert_eq!(controller.backend().sent_frames, 1);
    }

    #[tokio::test]
    async fn put_with_unknown_mode_keeps_mode_and_still_sends() {
        let state = test_state();
        let (status, _) = send(router(state.clone(), None), Method::PUT, "/state", r#"{"mode":3}"#).await;

        assert_eq!(status, StatusCode::OK);
        let controller = state.controller.lock().await;
        assert_eq!(controller.state().mode, AcMode::Cool);
        assert_eq!(controller.backend().sent_frames, 1);
    }

    #[tokio::test]
    async fn power_off_is_reported_and_sent_once() {
        let state = test_state();
        let (status, _) =
            send(router(state.clone(), None), Method::POST, "/state", r#"{"power":false}"#).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(router(state.clone(), None), Method::GET, "/state", "").await;
        let payload: StatePayload = serde_json::from_slice(&body).unwrap();
        assert!(!payload.power);

        let controller = state.controller.lock().await;
        assert_eq!(controller.backend().sent_frames, 1);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected_without_sending() {
        let state = test_state();
        let (status, _) = send(router(state.clone(), None), Method::POST, "/state", "{power").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.controller.lock().await.backend().sent_frames, 0);
    }

    #[tokio::test]
    async fn unmatched_routes_are_not_found() {
        let state = test_state();
        let (status, body) = send(router(state.clone(), None), Method::GET, "/nowhere", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"Not found");

        let (status, _) = send(router(state, None), Method::DELETE, "/state", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn web_root_keeps_not_found_for_unmatched_paths() {
        let web_root = std::env::temp_dir().join(format!("aircon-web-{}", std::process::id()));
        std::fs::create_dir_all(&web_root).unwrap();
        std::fs::write(web_root.join("index.html"), "<h1>aircon</h1>").unwrap();

        let state = test_state();
        let (status, body) =
            send(router(state.clone(), Some(web_root.clone())), Method::GET, "/index.html", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"<h1>aircon</h1>");

        let (status, body) =
            send(router(state.clone(), Some(web_root.clone())), Method::GET, "/nowhere", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"Not found");

        let (status, body) =
            send(router(state.clone(), Some(web_root.clone())), Method::POST, "/nowhere", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"Not found");

        let (status, _) = send(router(state, Some(web_root.clone())), Method::POST, "/state", "{}").await;
        assert_eq!(status, StatusCode::OK);

        std::fs::remove_dir_all(&web_root).unwrap();
    }

    #[tokio::test]
    async fn root_serves_control_page() {
        let (status, body) = send(router(test_state(), None), Method::GET, "/", "").await;

        assert_eq!(status, StatusCode::OK);
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains("fetch(\"/state\")"));
    }

    #[tokio::test]
    async fn diagnostics_track_sent_frames() {
        let state = test_state();
        let _ = send(router(state.clone(), None), Method::POST, "/state", r#"{"power":true}"#).await;
        let (status, body) = send(router(state, None), Method::GET, "/api/ir/diagnostics", "").await;

        assert_eq!(status, StatusCode::OK);
        let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["sentFrames"], 1);
        assert_eq!(view["carrierKHz"], 38);
        assert!(view["lastFrame"].as_str().unwrap().starts_with("B2 AE 4D"));
    }

    #[tokio::test]
    async fn skill_temperature_adjust_rejects_out_of_range() {
        let state = test_state();

        let outcome = process_skill_message(&state, TOPIC_SKILL_TARGET_ADJUST, "10")
            .await
            .unwrap();
        assert!(!outcome.reply.accepted);
        assert!(outcome.state.is_none());
        assert_eq!(state.controller.lock().await.payload().temp, 25);

        let outcome = process_skill_message(&state, TOPIC_SKILL_TARGET_ADJUST, "5")
            .await
            .unwrap();
        assert!(outcome.reply.accepted);
        assert_eq!(outcome.state.map(|payload| payload.temp), Some(30));
        assert_eq!(state.controller.lock().await.backend().sent_frames, 1);
    }

    #[tokio::test]
    async fn skill_fan_adjust_past_high_is_rejected() {
        let state = test_state();
        let _ = process_skill_message(&state, TOPIC_SKILL_FAN, "3").await;

        let outcome = process_skill_message(&state, TOPIC_SKILL_FAN_ADJUST, "1")
            .await
            .unwrap();
        assert!(!outcome.reply.accepted);
        assert_eq!(state.controller.lock().await.payload().fan, 3);
    }

    #[tokio::test]
    async fn skill_eco_mode_powers_on_in_dry() {
        let state = test_state();
        let outcome = process_skill_message(&state, TOPIC_SKILL_MODE, "ECO")
            .await
            .unwrap();

        assert_eq!(outcome.reply.intent, "thermostatMode");
        assert!(outcome.reply.accepted);
        let payload = outcome.state.unwrap();
        assert!(payload.power);
        assert_eq!(payload.mode, AcMode::Dry.code());
    }

    #[tokio::test]
    async fn skill_bad_payload_and_unknown_topic() {
        let state = test_state();
        let outcome = process_skill_message(&state, TOPIC_SKILL_FAN, "fast")
            .await
            .unwrap();
        assert_eq!(outcome.reply.intent, "rangeValue");
        assert!(!outcome.reply.accepted);

        assert!(process_skill_message(&state, "aircon/other", "1").await.is_none());
        assert_eq!(state.controller.lock().await.backend().sent_frames, 0);
    }
}
