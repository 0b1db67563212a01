use log::{debug, info};
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Resource, Responder, Route, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::config::AppConfig;
use crate::devices::StateUpdate;
use crate::error::AppError;
use crate::gpio::GpioBackend;
use crate::hub::{DeviceHub, EntityDescriptor};

pub struct AppState<B: GpioBackend> {
    pub hub: Arc<DeviceHub<B>>,
    /// Source for `POST /reload`. `None` disables reloading.
    pub config_path: Option<String>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            config_path: self.config_path.clone(),
        }
    }
}

#[derive(Deserialize, Default)]
struct EventsQuery {
    limit: Option<usize>,
}

#[derive(Deserialize, Default)]
struct StreamQuery {
    entity: Option<String>,
}

#[derive(Serialize)]
struct ReloadResponse {
    created: Vec<String>,
    failed: Vec<ReloadFailure>,
}

#[derive(Serialize)]
struct ReloadFailure {
    entity_id: String,
    error: String,
}

/// First frame on every stream: the current state of the watched entities.
#[derive(Serialize)]
struct Snapshot {
    entities: Vec<EntityDescriptor>,
}

impl<B: GpioBackend> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(only(Method::GET, "/entities", web::get().to(list_entities::<B>)))
            .service(only(Method::GET, "/entities/events", web::get().to(event_stream::<B>)))
            .service(only(Method::GET, "/entity/{entity_id}", web::get().to(get_entity::<B>)))
            .service(only(
                Method::POST,
                "/entity/{entity_id}/update",
                web::post().to(update_entity::<B>),
            ))
            .service(only(
                Method::GET,
                "/entity/{entity_id}/event",
                web::get().to(get_last_event::<B>),
            ))
            .service(only(
                Method::GET,
                "/entity/{entity_id}/events",
                web::get().to(get_events::<B>),
            ))
            .service(only(
                Method::POST,
                "/switch/{entity_id}/{command}",
                web::post().to(switch_command::<B>),
            ))
            .service(only(
                Method::POST,
                "/cover/{entity_id}/{command}",
                web::post().to(cover_command::<B>),
            ))
            .service(only(Method::POST, "/reload", web::post().to(reload::<B>)))
    }
}

/// A resource answering `method` with `route` and every other method with 405.
fn only(method: Method, path: &str, route: Route) -> Resource {
    web::resource(path).route(route).route(
        web::route()
            .guard(guard::fn_guard(move |ctx| ctx.head().method != method))
            .to(|| async { HttpResponse::MethodNotAllowed().finish() }),
    )
}

async fn list_entities<B: GpioBackend>(state: web::Data<AppState<B>>) -> impl Responder {
    web::Json(state.hub.list_entities().await)
}

async fn get_entity<B: GpioBackend>(
    entity_id: web::Path<String>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.hub.get_entity(&entity_id).await?))
}

async fn update_entity<B: GpioBackend>(
    entity_id: web::Path<String>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.hub.update_entity(&entity_id).await?))
}

async fn switch_command<B: GpioBackend>(
    path: web::Path<(String, String)>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let (entity_id, command) = path.into_inner();
    let entity_state = match command.as_str() {
        "on" => state.hub.turn_on(&entity_id).await?,
        "off" => state.hub.turn_off(&entity_id).await?,
        other => {
            return Err(AppError::InvalidValue(format!(
                "Unknown switch command {other}"
            )));
        }
    };

    Ok(web::Json(entity_state))
}

async fn cover_command<B: GpioBackend>(
    path: web::Path<(String, String)>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let (entity_id, command) = path.into_inner();
    let entity_state = match command.as_str() {
        "open" => state.hub.open_cover(&entity_id).await?,
        "close" => state.hub.close_cover(&entity_id).await?,
        other => {
            return Err(AppError::InvalidValue(format!(
                "Unknown cover command {other}"
            )));
        }
    };

    Ok(web::Json(entity_state))
}

async fn get_last_event<B: GpioBackend>(
    entity_id: web::Path<String>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    Ok(match state.hub.get_last_event(&entity_id).await? {
        Some(event) => HttpResponse::Ok().json(event),
        None => HttpResponse::Ok().finish(),
    })
}

async fn get_events<B: GpioBackend>(
    entity_id: web::Path<String>,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(
        state.hub.get_events(&entity_id, query.limit).await?,
    ))
}

async fn reload<B: GpioBackend>(state: web::Data<AppState<B>>) -> Result<impl Responder, AppError> {
    let path = state
        .config_path
        .clone()
        .ok_or_else(|| AppError::InvalidState("No configuration file to reload".into()))?;
    let hub = Arc::clone(&state.hub);
    // teardown waits on devices that may be mid-pulse
    let report = web::block(move || {
        let config = AppConfig::load_from_file(&path)?;
        hub.reload(config)
    })
    .await
    .map_err(|e| AppError::Gpio(format!("reload worker failed: {e}")))??;
    info!(
        "reload created {} entities, {} failed",
        report.created.len(),
        report.failed.len()
    );

    Ok(web::Json(ReloadResponse {
        created: report.created,
        failed: report
            .failed
            .into_iter()
            .map(|(entity_id, e)| ReloadFailure {
                entity_id,
                error: e.to_string(),
            })
            .collect(),
    }))
}

async fn event_stream<B: GpioBackend>(
    req: HttpRequest,
    body: web::Payload,
    query: web::Query<StreamQuery>,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let filter = query.into_inner().entity;
    let snapshot = match &filter {
        Some(id) => vec![state.hub.get_entity(id).await?],
        None => state.hub.list_entities().await.into_values().collect(),
    };
    // subscribe before answering so no update falls between snapshot and stream
    let rx = state.hub.subscribe_events();
    let (response, session, client) = actix_ws::handle(&req, body)
        .map_err(|e| AppError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(stream_updates(session, client, rx, filter, snapshot));
    Ok(response)
}

async fn stream_updates(
    mut session: Session,
    mut client: MessageStream,
    rx: broadcast::Receiver<StateUpdate>,
    filter: Option<String>,
    snapshot: Vec<EntityDescriptor>,
) {
    let mut updates = BroadcastStream::new(rx);
    if send_json(&mut session, &Snapshot { entities: snapshot }).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = client.recv() => match msg {
                Some(Ok(Message::Ping(bytes))) => {
                    let _ = session.pong(&bytes).await;
                }
                Some(Ok(Message::Close(reason))) => {
                    let _ = session.close(reason).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
            update = updates.next() => {
                let sent = match update {
                    Some(Ok(update)) => {
                        if filter.as_ref().is_some_and(|id| *id != update.entity_id) {
                            continue;
                        }
                        send_json(&mut session, &update).await
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                        send_json(&mut session, &json!({ "error": format!("missed {n} updates") })).await
                    }
                    None => break,
                };
                if sent.is_err() {
                    debug!("event stream client went away");
                    break;
                }
            }
        }
    }
}

async fn send_json<T: Serialize>(session: &mut Session, value: &T) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(value) {
        Ok(text) => session.text(text).await,
        Err(_) => Ok(()),
    }
}
