//! The HTTP control surface: thin JSON dispatch onto the controller.
//!
//! Every response carries either a `message` or an `error` key; client
//! mistakes are 400s, success is 200.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use envivo::{Binaries, Controller, FileReceiver};

type Reply = (StatusCode, Json<Value>);

#[derive(Clone)]
struct AppState {
	controller: Controller,
	receiver: Arc<FileReceiver>,
	binaries: Binaries,
}

pub async fn serve(
	bind: SocketAddr,
	controller: Controller,
	receiver: FileReceiver,
	binaries: Binaries,
	ui: Option<PathBuf>,
) -> anyhow::Result<()> {
	let state = AppState {
		controller,
		receiver: Arc::new(receiver),
		binaries,
	};

	let mut app = Router::new()
		.route(
			"/playlist",
			get(get_playlist)
				.post(post_upload)
				.put(put_status)
				.patch(patch_playlist)
				.delete(delete_playlist),
		)
		.route("/playlist/remote", post(post_remote))
		.route("/version", get(get_version))
		.layer(DefaultBodyLimit::max(512 * 1024 * 1024))
		.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
		.with_state(state);

	if let Some(ui) = ui.as_ref() {
		tracing::info!(dir = %ui.display(), "serving management ui");
		app = app.fallback_service(ServeDir::new(ui));
	}

	let listener = tokio::net::TcpListener::bind(bind).await?;
	tracing::info!(%bind, "control surface listening");

	#[cfg(unix)]
	// Notify systemd that we're ready.
	let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

	axum::serve(listener, app).await?;
	Ok(())
}

fn message(text: impl Into<String>) -> Reply {
	(StatusCode::OK, Json(json!({ "message": text.into() })))
}

fn bad_request(text: impl Into<String>) -> Reply {
	(StatusCode::BAD_REQUEST, Json(json!({ "error": text.into() })))
}

async fn get_version() -> Json<Value> {
	Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// Reading the snapshot also drains the pending notifications.
async fn get_playlist(State(state): State<AppState>) -> Json<envivo::StatusSnapshot> {
	Json(state.controller.snapshot().await)
}

#[derive(Deserialize)]
struct StatusBody {
	status: String,
}

async fn put_status(State(state): State<AppState>, body: Result<Json<StatusBody>, JsonRejection>) -> Reply {
	let Json(body) = match body {
		Ok(body) => body,
		Err(err) => return bad_request(err.body_text()),
	};

	match body.status.as_str() {
		"start" | "play" => {
			if !state.binaries.ready() {
				return bad_request("wrong status: external binaries not ready");
			}
			match state.controller.start().await {
				Ok(()) => message("Empezó la reproducción"),
				Err(err) => bad_request(err.to_string()),
			}
		}
		"stop" => match state.controller.stop().await {
			Ok(()) => message("Reproduccion finalizada"),
			Err(err) => bad_request(err.to_string()),
		},
		_ => bad_request("wrong status, must be start or stop"),
	}
}

async fn patch_playlist(State(state): State<AppState>, body: Result<Json<Value>, JsonRejection>) -> Reply {
	let Json(body) = match body {
		Ok(body) => body,
		Err(err) => return bad_request(err.body_text()),
	};
	let Some(map) = body.as_object() else {
		return bad_request("expected a json object");
	};

	for key in map.keys() {
		if !matches!(key.as_str(), "output" | "loop" | "id" | "position") {
			return bad_request(format!("unknown key: {key}"));
		}
	}

	let mut updates = Vec::new();

	if let Some(value) = map.get("loop") {
		let Some(looping) = value.as_bool() else {
			return bad_request("loop must be a boolean");
		};
		state.controller.set_loop(looping).await;
		updates.push(format!("Reproduccion en bucle: {looping}"));
	}

	if let Some(value) = map.get("output") {
		let Some(key) = value.as_str() else {
			return bad_request("output must be a string");
		};
		state.controller.set_output(key).await;
		updates.push(format!("Destino de transmision: {key}"));
	}

	if let Some(value) = map.get("id") {
		let Some(id) = value.as_str() else {
			return bad_request("id must be a string");
		};
		let Some(position) = map.get("position").and_then(Value::as_u64) else {
			return bad_request("unable to find position key");
		};
		if !state.controller.move_asset(id, position as usize).await {
			return bad_request(format!("unable to move video {id}"));
		}
		updates.push(format!("Nueva posicion {position} para el video {id}"));
	}

	if updates.is_empty() {
		return bad_request("nothing to update");
	}
	message(updates.join(". "))
}

#[derive(Deserialize)]
struct DeleteBody {
	id: String,
}

async fn delete_playlist(State(state): State<AppState>, body: Result<Json<DeleteBody>, JsonRejection>) -> Reply {
	let Json(body) = match body {
		Ok(body) => body,
		Err(err) => return bad_request(err.body_text()),
	};

	if body.id == "all" {
		return match state.controller.remove_all().await {
			Ok(()) => message("Se borro toda la playlist"),
			Err(_) => message("No se pudo borrar la playlist porque se encuentra en play"),
		};
	}

	if state.controller.remove(&body.id).await {
		message("Se elimino un item de la lista de reproduccion")
	} else {
		bad_request("No se ha podido eliminar el item")
	}
}

async fn post_upload(State(state): State<AppState>, mut multipart: Multipart) -> Reply {
	if !state.binaries.ready() {
		return bad_request("external binaries not ready");
	}

	let mut accepted = 0usize;
	loop {
		let field = match multipart.next_field().await {
			Ok(Some(field)) => field,
			Ok(None) => break,
			Err(err) => return bad_request(format!("broken multipart body: {err}")),
		};
		if field.name() != Some("files") {
			continue;
		}
		let Some(filename) = field.file_name().map(str::to_string) else {
			continue;
		};
		let data = match field.bytes().await {
			Ok(data) => data,
			Err(err) => return bad_request(format!("broken upload: {err}")),
		};

		match state.receiver.receive(&filename, &data).await {
			Ok(asset) => {
				state.controller.append(asset).await;
				accepted += 1;
			}
			Err(err) => tracing::warn!(%filename, %err, "rejected upload"),
		}
	}

	if accepted == 0 {
		return bad_request("no valid videos in upload");
	}
	message("Se agregaron nuevos videos a la reproduccion")
}

#[derive(Deserialize)]
struct RemoteBody {
	url: String,
}

async fn post_remote(State(state): State<AppState>, body: Result<Json<RemoteBody>, JsonRejection>) -> Reply {
	let Json(body) = match body {
		Ok(body) => body,
		Err(err) => return bad_request(err.body_text()),
	};

	match state.receiver.remote(&body.url).await {
		Ok(assets) if assets.is_empty() => bad_request("no videos found at that url"),
		Ok(assets) => {
			for asset in assets {
				state.controller.append(asset).await;
			}
			message("Se agregaron nuevos videos a la reproduccion")
		}
		Err(err) => bad_request(err.to_string()),
	}
}
