use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::backup::{
    ActivityEntry, ActivityLog, BackupError, ResolverOptions, RestoreExecutor, RestoreReport, SelectionSet,
    SelectionState, SnapshotBuilder, SnapshotStore, SnapshotType, StoredSnapshot, TraversalWarning,
};
use crate::resources::{ResourceKind, RestoreContext};
use crate::secrets::StaticSecretProvider;
use crate::storage::StorageError;
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/backups")
            .route("", web::post().to(create_backup))
            .route("", web::get().to(list_backups))
            .route("/{name}", web::get().to(get_backup))
            .route("/{name}", web::delete().to(delete_backup))
            .route("/{name}/rename", web::post().to(rename_backup))
            .route("/{name}/selection", web::get().to(get_selection))
            .route("/{name}/restore", web::post().to(restore_backup)),
    );
}

#[derive(Deserialize)]
pub struct CreateBackupRequest {
    #[serde(rename = "type")]
    pub snapshot_type: SnapshotType,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub engine: Option<String>,
    /// Explicit file name; generated from type and time when absent
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub expected_type: SnapshotType,
    /// Raw toggles; everything in the snapshot when absent
    #[serde(default)]
    pub selection: Option<SelectionSet>,
    /// Client secrets by Authorization id
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    #[serde(default)]
    pub include_agent_authorizations: bool,
    #[serde(default)]
    pub target_project: Option<String>,
    #[serde(default)]
    pub target_location: Option<String>,
}

#[derive(Serialize)]
struct BackupResponse {
    success: bool,
    name: String,
    summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<TraversalWarning>,
    activity: Vec<ActivityEntry>,
}

#[derive(Serialize)]
struct BackupListResponse {
    success: bool,
    backups: Vec<StoredSnapshot>,
    categories: BTreeMap<SnapshotType, Vec<String>>,
}

#[derive(Serialize)]
struct SelectionResponse {
    success: bool,
    #[serde(rename = "type")]
    snapshot_type: SnapshotType,
    selection: SelectionSet,
    counts: BTreeMap<ResourceKind, usize>,
}

#[derive(Serialize)]
struct RestoreResponse {
    success: bool,
    summary: String,
    report: RestoreReport,
    activity: Vec<ActivityEntry>,
}

fn error_response(err: &BackupError) -> HttpResponse {
    let mut builder = match err {
        BackupError::Validation(_) | BackupError::Storage(StorageError::InvalidKey(_)) => HttpResponse::BadRequest(),
        BackupError::Storage(StorageError::NotFound { .. }) => HttpResponse::NotFound(),
        BackupError::Storage(StorageError::PermissionDenied { .. }) => HttpResponse::Forbidden(),
        BackupError::Storage(StorageError::AlreadyExists { .. }) => HttpResponse::Conflict(),
        BackupError::Storage(StorageError::Backend(_)) | BackupError::FatalTraversal { .. } => {
            HttpResponse::BadGateway()
        }
        BackupError::Serialization(_) | BackupError::SecretLeak(_) => HttpResponse::InternalServerError(),
    };
    builder.json(serde_json::json!({
        "success": false,
        "error": err.to_string()
    }))
}

/// Marks a snapshot as being restored until dropped.
struct InFlightGuard {
    restores: Arc<DashMap<String, DateTime<Utc>>>,
    name: String,
}

impl InFlightGuard {
    fn acquire(restores: &Arc<DashMap<String, DateTime<Utc>>>, name: &str) -> Option<Self> {
        match restores.entry(name.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Utc::now());
                Some(Self {
                    restores: Arc::clone(restores),
                    name: name.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.restores.remove(&self.name);
    }
}

async fn create_backup(state: web::Data<AppState>, body: web::Json<CreateBackupRequest>) -> impl Responder {
    let request = body.into_inner();
    let ctx = state
        .context
        .clone()
        .with_collection(request.collection)
        .with_engine(request.engine);

    let activity = ActivityLog::new("[Backup]");
    let built = match SnapshotBuilder::new(state.api.as_ref(), &activity)
        .build(&ctx, request.snapshot_type)
        .await
    {
        Ok(built) => built,
        Err(e) => return error_response(&e),
    };

    match state.store.put(&built.snapshot, request.name.as_deref()).await {
        Ok(name) => {
            activity.success(format!("Saved backup {}", name));
            HttpResponse::Ok().json(BackupResponse {
                success: true,
                name,
                summary: built.snapshot.summary(),
                warnings: built.warnings,
                activity: activity.entries(),
            })
        }
        Err(e) => {
            log::error!("[Backup] Failed to save backup: {}", e);
            error_response(&e)
        }
    }
}

async fn list_backups(state: web::Data<AppState>) -> impl Responder {
    let backups = match state.store.list_typed().await {
        Ok(backups) => backups,
        Err(e) => return error_response(&e),
    };
    HttpResponse::Ok().json(BackupListResponse {
        success: true,
        categories: SnapshotStore::categorize(&backups),
        backups,
    })
}

async fn get_backup(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    match state.store.load_any(&path).await {
        Ok(snapshot) => HttpResponse::Ok().json(snapshot),
        Err(e) => error_response(&e),
    }
}

async fn delete_backup(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let name = path.into_inner();
    if state.restores_in_flight.contains_key(&name) {
        return HttpResponse::Conflict().json(serde_json::json!({
            "success": false,
            "error": format!("a restore from {} is in progress", name)
        }));
    }
    match state.store.delete(&name).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "success": true })),
        Err(e) => error_response(&e),
    }
}

async fn rename_backup(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RenameRequest>,
) -> impl Responder {
    match state.store.rename(&path, &body.new_name).await {
        Ok(name) => HttpResponse::Ok().json(serde_json::json!({ "success": true, "name": name })),
        Err(e) => error_response(&e),
    }
}

async fn get_selection(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let snapshot = match state.store.load_any(&path).await {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(&e),
    };
    HttpResponse::Ok().json(SelectionResponse {
        success: true,
        snapshot_type: snapshot.snapshot_type,
        selection: SelectionState::all(&snapshot, ResolverOptions::default()).into_selection(),
        counts: snapshot.counts(),
    })
}

async fn restore_backup(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RestoreRequest>,
) -> impl Responder {
    let name = path.into_inner();
    let request = body.into_inner();

    let Some(_guard) = InFlightGuard::acquire(&state.restores_in_flight, &name) else {
        return HttpResponse::Conflict().json(serde_json::json!({
            "success": false,
            "error": format!("a restore from {} is already running", name)
        }));
    };

    let snapshot = match state.store.load(&name, request.expected_type).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            log::warn!("[Restore] Refusing to restore {}: {}", name, e);
            return error_response(&e);
        }
    };

    let target = RestoreContext::new(
        request.target_project.as_deref().unwrap_or(&state.context.project),
        request.target_location.as_deref().unwrap_or(&state.context.location),
        &state.context.reasoning_engine_location,
    );
    let selection = request
        .selection
        .unwrap_or_else(|| SelectionState::all(&snapshot, ResolverOptions::default()).into_selection());
    let options = ResolverOptions {
        include_agent_authorizations: request.include_agent_authorizations,
    };

    let activity = ActivityLog::new("[Restore]");
    let secrets = StaticSecretProvider::new(request.secrets);
    let executor = RestoreExecutor::new(state.api.as_ref(), &secrets, &activity)
        .with_create_delay(state.config.create_delay())
        .with_poller(state.config.poller());

    match executor
        .restore(&snapshot, request.expected_type, &selection, options, &target)
        .await
    {
        Ok(report) => HttpResponse::Ok().json(RestoreResponse {
            success: report.failed() == 0,
            summary: report.summary(),
            report,
            activity: activity.entries(),
        }),
        Err(e) => error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockResourceApi;
    use crate::backup::fixtures;
    use crate::config::{env_vars, Config};
    use crate::storage::InMemoryObjectStore;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn state(api: &MockResourceApi) -> AppState {
        let config = Config::from_lookup(|key| match key {
            env_vars::PROJECT_ID => Some("src".to_string()),
            env_vars::RESTORE_CREATE_DELAY_MS => Some("0".to_string()),
            env_vars::OPERATION_POLL_INTERVAL_MS => Some("1".to_string()),
            _ => None,
        });
        AppState {
            context: config.restore_context().unwrap(),
            config,
            api: Arc::new(api.clone()),
            store: Arc::new(SnapshotStore::new(
                Arc::new(InMemoryObjectStore::new()),
                "bkt",
                "backups/",
            )),
            restores_in_flight: Arc::new(DashMap::new()),
        }
    }

    #[actix_web::test]
    async fn test_backup_list_and_restore() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(&api)))
                .configure(config),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/backups")
            .set_json(json!({"type": "DiscoveryResources", "name": "nightly"}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["name"], "nightly.json");

        let req = test::TestRequest::get().uri("/api/backups").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["backups"][0]["name"], "nightly.json");

        let req = test::TestRequest::get().uri("/api/backups/nightly.json/selection").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["type"], "DiscoveryResources");
        assert_eq!(body["counts"]["Agent"], 2);

        let req = test::TestRequest::post()
            .uri("/api/backups/nightly.json/restore")
            .set_json(json!({"expected_type": "Agents"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/backups/nightly.json/restore")
            .set_json(json!({
                "expected_type": "DiscoveryResources",
                "target_project": "dst",
                "secrets": {"auth1": "s1"}
            }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["report"]["outcomes"].as_array().unwrap().len(), 9);
        assert_eq!(body["summary"], "Restore finished: 9 created");
    }

    #[actix_web::test]
    async fn test_concurrent_restore_is_rejected() {
        let api = MockResourceApi::new();
        let state = state(&api);
        state.restores_in_flight.insert("busy.json".to_string(), Utc::now());
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/backups/busy.json/restore")
            .set_json(json!({"expected_type": "Agents"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CONFLICT);

        let req = test::TestRequest::get().uri("/api/backups/missing.json").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_rename_onto_existing_backup_conflicts() {
        let api = MockResourceApi::new();
        fixtures::seed_live(&api);
        let app = test::init_service(App::new().app_data(web::Data::new(state(&api))).configure(config)).await;

        for name in ["first", "second"] {
            let req = test::TestRequest::post()
                .uri("/api/backups")
                .set_json(json!({"type": "Authorizations", "name": name}))
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_success());
        }

        let req = test::TestRequest::post()
            .uri("/api/backups/first.json/rename")
            .set_json(json!({"new_name": "second"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CONFLICT);

        let req = test::TestRequest::get().uri("/api/backups").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["backups"].as_array().unwrap().len(), 2);
        assert!(body["categories"].as_object().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_guard_releases_on_drop() {
        let restores = Arc::new(DashMap::new());
        let guard = InFlightGuard::acquire(&restores, "a.json").unwrap();
        assert!(InFlightGuard::acquire(&restores, "a.json").is_none());
        drop(guard);
        assert!(InFlightGuard::acquire(&restores, "a.json").is_some());
    }
}
