use harbor_ipc::{
    Action, ActionReply, DbBatch, DbOpen, DbRequest, DbResponse, DbStatement, Envelope, HostRequest, HostResponse,
    InitResult, IpcError, Outcome, SandboxRequest, SandboxResponse, ServiceError,
    WorkerConfigQuery, WorkerHttpRequest, codes,
};
use harbor_types::{AppId, DbStep, ExecResult, RequestId, WorkerId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

// ── Envelope shape ──────────────────────────────────────────────

#[test]
fn request_envelope_shape() {
    let request = HostRequest::GetWorkerExecConfig(WorkerConfigQuery {
        app_id: AppId::parse("notes").unwrap(),
        worker_id: WorkerId::parse("sync").unwrap(),
    });
    let frame: Envelope<HostRequest, ()> = Envelope::Request {
        id: RequestId::from_wire("r-1"),
        payload: request,
    };
    assert_eq!(
        serde_json::to_value(&frame).unwrap(),
        json!({
            "type": "request",
            "id": "r-1",
            "payload": {
                "action": "get_worker_exec_config",
                "payload": {"appId": "notes", "workerId": "sync"}
            }
        })
    );
}

#[test]
fn success_response_shape() {
    let frame: Envelope<(), SandboxResponse> = Envelope::Response {
        id: RequestId::from_wire("r-2"),
        payload: SandboxResponse::Init(Outcome::Success(InitResult {
            worker_id: "sandbox-1".into(),
        })),
    };
    assert_eq!(
        serde_json::to_value(&frame).unwrap(),
        json!({
            "type": "response",
            "id": "r-2",
            "payload": {
                "action": "init",
                "payload": {"success": true, "result": {"workerId": "sandbox-1"}}
            }
        })
    );
}

#[test]
fn failure_response_round_trips() {
    let raw = json!({
        "type": "response",
        "id": "r-3",
        "payload": {
            "action": "get_ui_bundle",
            "payload": {"success": false, "error": {"code": "APP_NOT_FOUND", "message": "no such app"}}
        }
    });
    let frame: Envelope<HostRequest, HostResponse> = serde_json::from_value(raw).unwrap();
    let Envelope::Response { id, payload } = frame else {
        panic!("expected a response");
    };
    assert_eq!(id.as_str(), "r-3");
    let HostResponse::GetUiBundle(outcome) = payload else {
        panic!("wrong action");
    };
    let err = outcome.into_result().unwrap_err();
    assert_eq!(err.code(), codes::APP_NOT_FOUND);
}

#[test]
fn failure_without_error_is_rejected() {
    let raw = json!({"action": "init", "payload": {"success": false}});
    assert!(serde_json::from_value::<SandboxResponse>(raw).is_err());
}

#[test]
fn db_exec_success_decodes() {
    let raw = json!({"action": "DB_EXEC", "payload": {"success": true, "result": {"changes": 1, "lastInsertId": 4}}});
    let response: DbResponse = serde_json::from_value(raw).unwrap();
    assert_eq!(
        response,
        DbResponse::Exec(Outcome::Success(ExecResult {
            changes: 1,
            last_insert_id: 4
        }))
    );
}

// ── Action table ────────────────────────────────────────────────

#[test]
fn http_bodies_travel_as_base64() {
    let request = WorkerHttpRequest {
        method: "POST".into(),
        path: "/hooks".into(),
        query: None,
        headers: vec![("content-type".into(), "application/octet-stream".into())],
        body: vec![0, 159, 146, 150],
    };
    let value = serde_json::to_value(&request).unwrap();
    assert_eq!(value["body"], json!("AJ+Slg=="));
    let back: WorkerHttpRequest = serde_json::from_value(value).unwrap();
    assert_eq!(back, request);
}

#[test]
fn mapping_update_is_a_bare_map() {
    let mut mapping = BTreeMap::new();
    mapping.insert(
        AppId::parse("notes").unwrap(),
        harbor_types::InstallId::parse("inst-7").unwrap(),
    );
    let request = SandboxRequest::UpdateAppInstallIdMapping(mapping);
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({"action": "update_app_install_id_mapping", "payload": {"notes": "inst-7"}})
    );
}

#[test]
fn default_timeouts_follow_action_cost() {
    let lookup = HostRequest::GetWorkerExecConfig(WorkerConfigQuery {
        app_id: AppId::parse("a").unwrap(),
        worker_id: WorkerId::parse("w").unwrap(),
    });
    assert_eq!(lookup.default_timeout(), Duration::from_secs(10));

    let app = AppId::parse("a").unwrap();
    let statement = DbStatement {
        app_id: app.clone(),
        sql: "SELECT 1".into(),
        params: vec![],
        row_mode: None,
    };
    let db = [
        (
            DbRequest::Open(DbOpen {
                app_id: app.clone(),
                token: "t".into(),
            }),
            "DB_OPEN",
        ),
        (DbRequest::Query(statement.clone()), "DB_QUERY"),
        (DbRequest::Exec(statement), "DB_EXEC"),
        (
            DbRequest::Batch(DbBatch {
                app_id: app,
                steps: vec![DbStep::new("DELETE FROM big", vec![])],
                atomic: true,
            }),
            "DB_BATCH",
        ),
    ];
    for (request, action) in db {
        assert_eq!(request.action_name(), action);
        assert_eq!(request.default_timeout(), Duration::from_secs(10), "{action}");
    }
}

#[test]
fn replies_can_be_shared_across_threads() {
    fn shareable<T: Send + Sync + 'static>() {}
    shareable::<<HostRequest as Action>::Reply>();
    shareable::<<SandboxRequest as Action>::Reply>();
    shareable::<<DbRequest as Action>::Reply>();
}

#[test]
fn open_token_is_not_logged() {
    let open = DbOpen {
        app_id: AppId::parse("notes").unwrap(),
        token: "super-secret-token".into(),
    };
    assert!(!format!("{open:?}").contains("super-secret-token"));
    assert_eq!(
        serde_json::to_value(DbRequest::Open(open)).unwrap(),
        json!({"action": "DB_OPEN", "payload": {"appId": "notes", "token": "super-secret-token"}})
    );
}

#[test]
fn failure_reply_matches_request_action() {
    let request = HostRequest::GetWorkerExecConfig(WorkerConfigQuery {
        app_id: AppId::parse("a").unwrap(),
        worker_id: WorkerId::parse("w").unwrap(),
    });
    let reply = request.failure_reply(ServiceError::new(codes::INTERNAL_ERROR, "boom"));
    assert_eq!(reply.action_name(), request.action_name());
}

#[test]
fn transport_errors_keep_stable_codes() {
    let timeout = IpcError::Timeout {
        action: "init",
        timeout_ms: 30_000,
    };
    assert_eq!(timeout.code(), codes::TIMEOUT);
    let wire = timeout.into_service_error();
    assert_eq!(wire.code, codes::TIMEOUT);
    assert!(wire.message.contains("30000ms"));

    let remote = IpcError::Remote(ServiceError::new(codes::WORKER_NOT_FOUND, "gone"));
    assert_eq!(remote.into_service_error().code, codes::WORKER_NOT_FOUND);
}
