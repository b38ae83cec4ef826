//! Admin API under `/api/topom`.
//!
//! Reads are served from the latest snapshot and never wait on mutations.
//! Commands are `PUT` requests that carry the capability token in the path
//! and the snapshot version the caller observed in `?version=`; they run
//! through the operation pipeline and answer `{version}` of the new snapshot,
//! or an [`ErrorBody`].

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use topom_core::{CommandReply, ErrorBody};
use tower::{Service, ServiceExt};

use super::AppState;
use crate::cluster::{context, TopomError};
use crate::service::{service_names, Operation, OperationContext, OperationError, OperationResponse};

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// All `/api/topom` routes, waiting for their [`AppState`].
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/api/topom", get(overview))
        .route("/api/topom/model", get(model))
        .route("/api/topom/xping/{xauth}", get(xping))
        .route("/api/topom/stats/{xauth}", get(stats))
        .route("/api/topom/slots/{xauth}", get(slots))
        .route("/api/topom/shutdown/{xauth}", put(shutdown))
        // proxies
        .route("/api/topom/proxy/create/{xauth}/{addr}", put(proxy_create))
        .route("/api/topom/proxy/reinit/{xauth}/{token}", put(proxy_reinit))
        .route("/api/topom/proxy/remove/{xauth}/{token}/{force}", put(proxy_remove))
        // groups
        .route("/api/topom/group/create/{xauth}/{gid}", put(group_create))
        .route("/api/topom/group/remove/{xauth}/{gid}", put(group_remove))
        .route("/api/topom/group/add/{xauth}/{gid}/{addr}", put(group_add_server))
        .route("/api/topom/group/del/{xauth}/{gid}/{addr}", put(group_del_server))
        .route("/api/topom/group/promote/{xauth}/{gid}/{addr}", put(group_promote))
        .route("/api/topom/group/promote-commit/{xauth}/{gid}", put(group_promote_commit))
        .route("/api/topom/group/resync/{xauth}/{gid}", put(group_resync))
        .route("/api/topom/group/resync-all/{xauth}", put(group_resync_all))
        .route(
            "/api/topom/group/replica-groups/{xauth}/{gid}/{addr}/{value}",
            put(group_replica_groups),
        )
        .route(
            "/api/topom/group/replica-groups-all/{xauth}/{value}",
            put(group_replica_groups_all),
        )
        .route("/api/topom/group/action/create/{xauth}/{addr}", put(sync_action_create))
        .route("/api/topom/group/action/remove/{xauth}/{addr}", put(sync_action_remove))
        // slots
        .route("/api/topom/slots/action/create/{xauth}/{sid}/{gid}", put(slot_action_create))
        .route(
            "/api/topom/slots/action/create-some/{xauth}/{src}/{dst}/{num}",
            put(slot_action_create_some),
        )
        .route(
            "/api/topom/slots/action/create-range/{xauth}/{beg}/{end}/{gid}",
            put(slot_action_create_range),
        )
        .route("/api/topom/slots/action/remove/{xauth}/{sid}", put(slot_action_remove))
        .route("/api/topom/slots/action/interval/{xauth}/{value}", put(slot_action_interval))
        .route("/api/topom/slots/action/disabled/{xauth}/{value}", put(slot_action_disabled))
        .route("/api/topom/slots/rebalance/{xauth}/{confirm}", put(slots_rebalance))
        // sentinels
        .route("/api/topom/sentinels/add/{xauth}/{addr}", put(sentinel_add))
        .route("/api/topom/sentinels/del/{xauth}/{addr}/{force}", put(sentinel_del))
        .route("/api/topom/sentinels/resync-all/{xauth}", put(sentinel_resync_all))
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structured error reply.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn from_operation(state: &AppState, err: &OperationError) -> Self {
        let entity = match err {
            OperationError::Topom(e) => e.entity().map(str::to_string),
            _ => None,
        };
        Self {
            status: status_of(err),
            body: ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
                version: state.topom.version(),
                entity,
            },
        }
    }

    fn unauthorized(state: &AppState) -> Self {
        Self::from_operation(state, &OperationError::Topom(TopomError::Unauthorized))
    }

    fn missing_version(state: &AppState) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody {
                kind: "validation".to_string(),
                message: "missing query parameter `version`".to_string(),
                version: state.topom.version(),
                entity: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status of an operation failure.
fn status_of(err: &OperationError) -> StatusCode {
    match err {
        OperationError::Topom(e) => match e {
            TopomError::Validation { .. } => StatusCode::BAD_REQUEST,
            TopomError::Conflict { .. } => StatusCode::CONFLICT,
            TopomError::External { .. } => StatusCode::BAD_GATEWAY,
            TopomError::Persistence(_) | TopomError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            TopomError::Invariant(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TopomError::Unauthorized => StatusCode::FORBIDDEN,
            TopomError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        },
        OperationError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OperationError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
        OperationError::UnknownService { .. }
        | OperationError::WrongService
        | OperationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

type ApiResult = Result<Response, ApiError>;

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

async fn overview(State(state): State<AppState>) -> Response {
    let snapshot = state.topom.snapshot();
    Json(json!({
        "build": env!("CARGO_PKG_VERSION"),
        "config": state.topom.config(),
        "model": &*snapshot,
        "stats": state.topom.status(),
    }))
    .into_response()
}

async fn model(State(state): State<AppState>) -> Response {
    let snapshot = state.topom.snapshot();
    Json(&*snapshot).into_response()
}

async fn xping(State(state): State<AppState>, Path(xauth): Path<String>) -> ApiResult {
    if !state.topom.verify_xauth(&xauth) {
        return Err(ApiError::unauthorized(&state));
    }
    Ok(Json(CommandReply {
        version: state.topom.version(),
    })
    .into_response())
}

async fn stats(State(state): State<AppState>, Path(xauth): Path<String>) -> ApiResult {
    if !state.topom.verify_xauth(&xauth) {
        return Err(ApiError::unauthorized(&state));
    }
    Ok(Json(state.topom.status()).into_response())
}

/// Routing of every slot as a proxy would receive it.
async fn slots(State(state): State<AppState>, Path(xauth): Path<String>) -> ApiResult {
    if !state.topom.verify_xauth(&xauth) {
        return Err(ApiError::unauthorized(&state));
    }
    let snapshot = state.topom.snapshot();
    Ok(Json(context::all_slots(&snapshot, None)).into_response())
}

// ---------------------------------------------------------------------------
// Command plumbing
// ---------------------------------------------------------------------------

/// Query string of every command.
#[derive(Debug, Default, Deserialize)]
pub struct CommandQuery {
    /// Snapshot version the caller observed. Required.
    pub version: Option<u64>,
    /// Accept an unreachable server or proxy as already done.
    #[serde(default)]
    pub allow_conflict: bool,
    #[serde(default)]
    pub datacenter: String,
}

fn command_context(
    state: &AppState,
    service: &'static str,
    xauth: String,
    query: &CommandQuery,
) -> Result<OperationContext, ApiError> {
    let version = query.version.ok_or_else(|| ApiError::missing_version(state))?;
    Ok(OperationContext::new(
        state.next_call_id(),
        service,
        xauth,
        Some(version),
        state.operation_timeout_ms,
    ))
}

/// Runs one command through the pipeline and renders its reply.
async fn dispatch(state: &AppState, op: Operation) -> ApiResult {
    let Some(_running) = state.shutdown.admit_command() else {
        return Err(ApiError::from_operation(
            state,
            &OperationError::Topom(TopomError::Closed),
        ));
    };
    let wakes_drivers = matches!(
        op.ctx().service_name,
        service_names::SLOTS | service_names::GROUPS
    );

    let fut = {
        let mut pipeline = state.pipeline.lock().await;
        match ServiceExt::ready(&mut *pipeline).await {
            Ok(svc) => svc.call(op),
            Err(e) => return Err(ApiError::from_operation(state, &e)),
        }
    };
    let resp = fut
        .await
        .map_err(|e| ApiError::from_operation(state, &e))?;

    if wakes_drivers {
        state.kicker.kick();
    }
    Ok(match resp {
        OperationResponse::Rebalance(plan) => Json(plan).into_response(),
        other => Json(CommandReply {
            version: other.version().unwrap_or_else(|| state.topom.version()),
        })
        .into_response(),
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn shutdown(
    State(state): State<AppState>,
    Path(xauth): Path<String>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::ADMIN, xauth, &q)?;
    dispatch(&state, Operation::Close { ctx }).await
}

async fn proxy_create(
    State(state): State<AppState>,
    Path((xauth, addr)): Path<(String, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::PROXIES, xauth, &q)?;
    dispatch(&state, Operation::CreateProxy { ctx, admin_addr: addr }).await
}

async fn proxy_reinit(
    State(state): State<AppState>,
    Path((xauth, token)): Path<(String, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::PROXIES, xauth, &q)?;
    let allow_conflict = q.allow_conflict;
    dispatch(
        &state,
        Operation::ReinitProxy {
            ctx,
            token,
            allow_conflict,
        },
    )
    .await
}

async fn proxy_remove(
    State(state): State<AppState>,
    Path((xauth, token, force)): Path<(String, String, u8)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::PROXIES, xauth, &q)?;
    dispatch(
        &state,
        Operation::RemoveProxy {
            ctx,
            token,
            force: force != 0,
        },
    )
    .await
}

async fn group_create(
    State(state): State<AppState>,
    Path((xauth, gid)): Path<(String, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::CreateGroup { ctx, gid }).await
}

async fn group_remove(
    State(state): State<AppState>,
    Path((xauth, gid)): Path<(String, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::RemoveGroup { ctx, gid }).await
}

async fn group_add_server(
    State(state): State<AppState>,
    Path((xauth, gid, addr)): Path<(String, u32, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    let datacenter = q.datacenter;
    dispatch(
        &state,
        Operation::AddServer {
            ctx,
            gid,
            addr,
            datacenter,
        },
    )
    .await
}

async fn group_del_server(
    State(state): State<AppState>,
    Path((xauth, gid, addr)): Path<(String, u32, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    let allow_conflict = q.allow_conflict;
    dispatch(
        &state,
        Operation::RemoveServer {
            ctx,
            gid,
            addr,
            allow_conflict,
        },
    )
    .await
}

async fn group_promote(
    State(state): State<AppState>,
    Path((xauth, gid, addr)): Path<(String, u32, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::PromoteServer { ctx, gid, addr }).await
}

async fn group_promote_commit(
    State(state): State<AppState>,
    Path((xauth, gid)): Path<(String, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::PromoteCommit { ctx, gid }).await
}

async fn group_resync(
    State(state): State<AppState>,
    Path((xauth, gid)): Path<(String, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::ResyncGroup { ctx, gid }).await
}

async fn group_resync_all(
    State(state): State<AppState>,
    Path(xauth): Path<String>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::ResyncAllGroups { ctx }).await
}

async fn group_replica_groups(
    State(state): State<AppState>,
    Path((xauth, gid, addr, value)): Path<(String, u32, String, u8)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(
        &state,
        Operation::EnableReplicaGroups {
            ctx,
            gid,
            addr,
            enabled: value != 0,
        },
    )
    .await
}

async fn group_replica_groups_all(
    State(state): State<AppState>,
    Path((xauth, value)): Path<(String, u8)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(
        &state,
        Operation::EnableReplicaGroupsAll {
            ctx,
            enabled: value != 0,
        },
    )
    .await
}

async fn sync_action_create(
    State(state): State<AppState>,
    Path((xauth, addr)): Path<(String, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::CreateSyncAction { ctx, addr }).await
}

async fn sync_action_remove(
    State(state): State<AppState>,
    Path((xauth, addr)): Path<(String, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::GROUPS, xauth, &q)?;
    dispatch(&state, Operation::RemoveSyncAction { ctx, addr }).await
}

async fn slot_action_create(
    State(state): State<AppState>,
    Path((xauth, sid, gid)): Path<(String, u32, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(&state, Operation::CreateSlotAction { ctx, sid, target: gid }).await
}

async fn slot_action_create_some(
    State(state): State<AppState>,
    Path((xauth, src, dst, num)): Path<(String, u32, u32, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(
        &state,
        Operation::CreateSlotActionSome {
            ctx,
            count: num,
            from: src,
            to: dst,
        },
    )
    .await
}

async fn slot_action_create_range(
    State(state): State<AppState>,
    Path((xauth, beg, end, gid)): Path<(String, u32, u32, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(
        &state,
        Operation::CreateSlotActionRange {
            ctx,
            begin: beg,
            end,
            target: gid,
        },
    )
    .await
}

async fn slot_action_remove(
    State(state): State<AppState>,
    Path((xauth, sid)): Path<(String, u32)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(&state, Operation::RemoveSlotAction { ctx, sid }).await
}

async fn slot_action_interval(
    State(state): State<AppState>,
    Path((xauth, value)): Path<(String, u64)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(
        &state,
        Operation::SetSlotActionInterval {
            ctx,
            interval_ms: value,
        },
    )
    .await
}

async fn slot_action_disabled(
    State(state): State<AppState>,
    Path((xauth, value)): Path<(String, u8)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(
        &state,
        Operation::SetSlotActionDisabled {
            ctx,
            disabled: value != 0,
        },
    )
    .await
}

async fn slots_rebalance(
    State(state): State<AppState>,
    Path((xauth, confirm)): Path<(String, u8)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SLOTS, xauth, &q)?;
    dispatch(
        &state,
        Operation::Rebalance {
            ctx,
            confirm: confirm != 0,
        },
    )
    .await
}

async fn sentinel_add(
    State(state): State<AppState>,
    Path((xauth, addr)): Path<(String, String)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SENTINELS, xauth, &q)?;
    dispatch(&state, Operation::AddSentinel { ctx, addr }).await
}

async fn sentinel_del(
    State(state): State<AppState>,
    Path((xauth, addr, force)): Path<(String, String, u8)>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SENTINELS, xauth, &q)?;
    dispatch(
        &state,
        Operation::DelSentinel {
            ctx,
            addr,
            force: force != 0,
        },
    )
    .await
}

async fn sentinel_resync_all(
    State(state): State<AppState>,
    Path(xauth): Path<String>,
    Query(q): Query<CommandQuery>,
) -> ApiResult {
    let ctx = command_context(&state, service_names::SENTINELS, xauth, &q)?;
    dispatch(&state, Operation::ResyncSentinels { ctx }).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;

    use super::*;
    use crate::network::ShutdownController;
    use crate::service::{Kicker, TopomConfig};
    use crate::testing::{test_topom, Fakes};

    async fn app() -> (Router, AppState, Fakes) {
        let (topom, fakes) = test_topom(8).await;
        let state = AppState::new(
            topom,
            &TopomConfig::default(),
            Kicker::default(),
            Arc::new(ShutdownController::new()),
        );
        state.shutdown.set_ready();
        let router = api_routes().with_state(state.clone());
        (router, state, fakes)
    }

    async fn send(router: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn stats_requires_the_capability_token() {
        let (router, state, _fakes) = app().await;

        let (status, body) = send(&router, "GET", "/api/topom/stats/forged").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "unauthorized");

        let uri = format!("/api/topom/stats/{}", state.topom.xauth());
        let (status, body) = send(&router, "GET", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 0);
        assert_eq!(body["slots"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn commands_require_a_version() {
        let (router, state, _fakes) = app().await;
        let xauth = state.topom.xauth().to_string();

        let (status, body) =
            send(&router, "PUT", &format!("/api/topom/group/create/{xauth}/1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
        assert_eq!(state.topom.version(), 0);
    }

    #[tokio::test]
    async fn commands_commit_and_stale_versions_conflict() {
        let (router, state, _fakes) = app().await;
        let xauth = state.topom.xauth().to_string();

        let uri = format!("/api/topom/group/create/{xauth}/1?version=0");
        let (status, body) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 1);

        let uri = format!("/api/topom/group/create/{xauth}/2?version=0");
        let (status, body) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");
        assert_eq!(body["version"], 1);
        assert!(state.topom.snapshot().group(2).is_none());
    }

    #[tokio::test]
    async fn validation_errors_name_the_entity() {
        let (router, state, _fakes) = app().await;
        let xauth = state.topom.xauth().to_string();

        let uri = format!("/api/topom/group/remove/{xauth}/9?version=0");
        let (status, body) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["entity"], "group-[9]");
    }

    #[tokio::test]
    async fn forged_token_is_rejected_for_commands() {
        let (router, state, _fakes) = app().await;
        let (status, body) =
            send(&router, "PUT", "/api/topom/group/create/forged/1?version=0").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["kind"], "unauthorized");
        assert_eq!(state.topom.version(), 0);
    }

    #[tokio::test]
    async fn rebalance_preview_returns_plan_without_committing() {
        let (router, state, _fakes) = app().await;
        let xauth = state.topom.xauth().to_string();
        send(&router, "PUT", &format!("/api/topom/group/create/{xauth}/1?version=0")).await;
        send(
            &router,
            "PUT",
            &format!("/api/topom/group/add/{xauth}/1/10.0.0.1:6379?version=1"),
        )
        .await;

        let uri = format!("/api/topom/slots/rebalance/{xauth}/0?version=2");
        let (status, body) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 2);
        assert_eq!(body["plan"].as_object().unwrap().len(), 8);
        assert_eq!(state.topom.version(), 2);
    }

    #[tokio::test]
    async fn unreachable_proxy_maps_to_bad_gateway() {
        let (router, state, fakes) = app().await;
        let xauth = state.topom.xauth().to_string();
        fakes.proxy.fail("10.0.0.20:11080");

        let uri = format!("/api/topom/proxy/create/{xauth}/10.0.0.20:11080?version=0");
        let (status, body) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "external");
        assert!(state.topom.snapshot().proxies.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_topom_but_reads_continue() {
        let (router, state, _fakes) = app().await;
        let xauth = state.topom.xauth().to_string();

        let (status, _) =
            send(&router, "PUT", &format!("/api/topom/shutdown/{xauth}?version=0")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.topom.is_closed());

        let uri = format!("/api/topom/group/create/{xauth}/1?version=0");
        let (status, body) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["kind"], "closed");

        let (status, body) = send(&router, "GET", "/api/topom/model").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], 0);
    }

    #[tokio::test]
    async fn draining_refuses_new_commands() {
        let (router, state, _fakes) = app().await;
        let xauth = state.topom.xauth().to_string();
        state.shutdown.trigger_shutdown();

        let uri = format!("/api/topom/group/create/{xauth}/1?version=0");
        let (status, _) = send(&router, "PUT", &uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.topom.version(), 0);
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn overview_hides_the_product_auth() {
        let (router, _state, _fakes) = app().await;
        let (status, body) = send(&router, "GET", "/api/topom").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["product_name"], "demo");
        assert!(body["config"].get("product_auth").is_none());
        assert_eq!(body["stats"]["version"], 0);
    }
}
