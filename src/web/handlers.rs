//! Route handlers for the control API spec.md §6 names. Query/body
//! validation follows the teacher's `provisioning.rs` style: early-return
//! on a bad request with a JSON `{"error": ...}` body.

use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::ids::StreamDid;
use crate::orchestrator::OrchestratorError;

use super::web_state;

pub fn create_router() -> Router {
    let router = Router::new()
        .push(Router::with_path("info").get(info))
        .push(Router::with_path("get-guild-id").get(get_guild_id))
        .push(Router::with_path("get-space-id").get(get_space_id))
        .push(Router::with_path("join-space").post(join_space));

    #[cfg(feature = "metrics")]
    let router = router.push(Router::with_path("metrics").get(super::metrics::metrics_endpoint));

    router
}

fn render_error(res: &mut Response, status: StatusCode, message: &str) {
    res.status_code(status);
    res.render(Json(json!({ "error": message })));
}

/// `GET /info` — 500 before the Discord bot has received its READY payload,
/// per spec.md §6.
#[handler]
pub async fn info(res: &mut Response) {
    let state = web_state();
    let Some(discord_app_id) = state.orchestrator.application_id() else {
        render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "discord bot not ready");
        return;
    };

    res.render(Json(json!({
        "discordAppId": discord_app_id,
        "bridgeDid": state.orchestrator.bridge_did(),
    })));
}

#[handler]
pub async fn get_guild_id(req: &mut Request, res: &mut Response) {
    let Some(space_id) = req.query::<String>("spaceId") else {
        render_error(res, StatusCode::BAD_REQUEST, "missing spaceId query parameter");
        return;
    };
    let Ok(space_id) = StreamDid::parse(space_id) else {
        render_error(res, StatusCode::BAD_REQUEST, "spaceId is not a valid did");
        return;
    };

    match web_state().orchestrator.get_guild_id(&space_id).await {
        Some(guild_id) => res.render(Json(json!({ "guildId": guild_id }))),
        None => render_error(res, StatusCode::NOT_FOUND, "no bridge found for this space"),
    }
}

#[handler]
pub async fn get_space_id(req: &mut Request, res: &mut Response) {
    let Some(guild_id) = req.query::<String>("guildId") else {
        render_error(res, StatusCode::BAD_REQUEST, "missing guildId query parameter");
        return;
    };

    match web_state().orchestrator.get_space_id(&guild_id).await {
        Some(space_id) => res.render(Json(json!({ "spaceId": space_id.as_str() }))),
        None => render_error(res, StatusCode::NOT_FOUND, "no bridge found for this guild"),
    }
}

#[derive(Debug, Deserialize)]
struct JoinSpaceBody {
    #[serde(rename = "spaceId")]
    space_id: String,
}

/// `POST /join-space` — body carries `spaceId` per spec.md §6; `guildId` is
/// taken from the query string alongside it, the same way `get-guild-id`/
/// `get-space-id` take their lookup key, since joining a space always
/// happens on behalf of one specific guild.
#[handler]
pub async fn join_space(req: &mut Request, res: &mut Response) {
    let Some(guild_id) = req.query::<String>("guildId") else {
        render_error(res, StatusCode::BAD_REQUEST, "missing guildId query parameter");
        return;
    };
    let body: JoinSpaceBody = match req.parse_json().await {
        Ok(body) => body,
        Err(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "malformed request body");
            return;
        }
    };
    let Ok(space_id) = StreamDid::parse(body.space_id) else {
        render_error(res, StatusCode::BAD_REQUEST, "spaceId is not a valid did");
        return;
    };

    let orchestrator = &web_state().orchestrator;
    match orchestrator.create_bridge(guild_id, space_id.clone()).await {
        Ok(()) => res.render(Json(json!({
            "bridgeDid": orchestrator.bridge_did(),
            "spaceId": space_id.as_str(),
        }))),
        Err(OrchestratorError::SpaceNotFound(_)) => {
            render_error(res, StatusCode::INTERNAL_SERVER_ERROR, "space does not exist");
        }
        Err(err) => render_error(res, StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}
