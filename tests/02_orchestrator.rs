mod support;

use std::sync::Arc;
use std::time::Duration;

use busbridge::errors::BridgeError;
use busbridge::pool::ConnectionPool;
use busbridge::remote::CallError;
use busbridge::session::{
    OperationKind, OperationRequest, OrchestratorSettings, SessionOrchestrator, StepOutcome,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

use support::{FakeConnector, principals};

fn orchestrator(
    backend: &FakeConnector,
    operation_timeout: Option<Duration>,
) -> (SessionOrchestrator, Arc<ConnectionPool>) {
    let pool = backend.pool(2, Duration::from_secs(1));
    let orchestrator = SessionOrchestrator::new(
        pool.clone(),
        Arc::new(principals()),
        OrchestratorSettings {
            logoff_grace: Duration::from_millis(200),
            operation_timeout,
        },
    );
    (orchestrator, pool)
}

fn jdoe() -> OperationRequest {
    OperationRequest::new("jdoe@corp")
}

#[tokio::test]
async fn run_job_logs_on_calls_and_logs_off() {
    let backend = FakeConnector::new();
    backend.respond("RunBatchJob", json!({ "run_id": "R-1" }));
    let (orchestrator, pool) = orchestrator(&backend, None);

    let response = orchestrator
        .execute("run_job", jdoe().with("job", "NIGHTLY_LOAD"))
        .await
        .unwrap();

    assert_eq!(response.operation, OperationKind::RunJob);
    assert_eq!(response.result, json!({ "run_id": "R-1" }));
    assert_eq!(response.steps.len(), 1);
    assert_eq!(response.steps[0].outcome, StepOutcome::Succeeded);
    assert_eq!(backend.operations(), ["Logon", "RunBatchJob", "Logoff"]);

    let calls = backend.calls();
    assert!(calls.iter().all(|c| c.principal == "RFC_JDOE"));
    assert_eq!(calls[0].request["user"], "jdoe@corp");
    assert_eq!(calls[1].request["job"], "NIGHTLY_LOAD");
    assert_eq!(calls[1].request["session_token"], "tok-1");
    assert_eq!(calls[2].request["session_token"], "tok-1");

    let stats = pool.stats();
    assert_eq!(stats.busy, 0);
    assert_eq!(stats.idle, 1);
}

#[tokio::test]
async fn copy_then_run_threads_the_new_job_id() {
    let backend = FakeConnector::new();
    backend.respond("CopyBatchJob", json!({ "job_id": "NIGHTLY_LOAD_2" }));
    let (orchestrator, _pool) = orchestrator(&backend, None);

    let response = orchestrator
        .execute(
            "copy_then_run_job",
            jdoe()
                .with("job", "NIGHTLY_LOAD")
                .with("new_name", "NIGHTLY_LOAD_2")
                .with("parameters", json!({ "region": "EU" })),
        )
        .await
        .unwrap();

    assert_eq!(response.steps.len(), 2);
    assert_eq!(
        backend.operations(),
        ["Logon", "CopyBatchJob", "RunBatchJob", "Logoff"]
    );

    let copy = backend.last_request("CopyBatchJob").unwrap();
    assert_eq!(copy["job"], "NIGHTLY_LOAD");
    assert_eq!(copy["new_name"], "NIGHTLY_LOAD_2");

    let run = backend.last_request("RunBatchJob").unwrap();
    assert_eq!(run["job"], "NIGHTLY_LOAD_2");
    assert_eq!(run["parameters"], json!({ "region": "EU" }));
}

#[tokio::test]
async fn failed_copy_skips_run_but_still_logs_off() {
    let backend = FakeConnector::new();
    backend.respond("CopyBatchJob", json!({ "error": "job locked" }));
    let (orchestrator, pool) = orchestrator(&backend, None);

    let err = orchestrator
        .execute(
            "copy_then_run_job",
            jdoe().with("job", "NIGHTLY_LOAD").with("new_name", "COPY"),
        )
        .await
        .unwrap_err();

    match err {
        BridgeError::Remote { operation, message } => {
            assert_eq!(operation, "CopyBatchJob");
            assert_eq!(message, "job locked");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(backend.count("RunBatchJob"), 0);
    assert_eq!(backend.operations(), ["Logon", "CopyBatchJob", "Logoff"]);
    assert_eq!(pool.stats().busy, 0);
}

#[tokio::test]
async fn rejected_logon_is_not_followed_by_logoff() {
    let backend = FakeConnector::new();
    backend.respond("Logon", json!({ "error": "user locked" }));
    let (orchestrator, pool) = orchestrator(&backend, None);

    let err = orchestrator
        .execute("get_status", jdoe().with("run_id", "R-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::AuthenticationFailure { .. }));
    assert_eq!(backend.operations(), ["Logon"]);
    assert_eq!(pool.stats().busy, 0);
}

#[tokio::test]
async fn invalid_requests_never_take_a_session() {
    let backend = FakeConnector::new();
    let (orchestrator, _pool) = orchestrator(&backend, None);

    let err = orchestrator.execute("run_job", jdoe()).await.unwrap_err();
    assert!(matches!(err, BridgeError::Validation { field: "job" }));

    let err = orchestrator
        .execute("get_logs", OperationRequest::new("").with("run_id", "R-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Validation { field: "external_user" }));

    let err = orchestrator
        .execute("get_logs", OperationRequest::new("mallory").with("run_id", "R-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::AuthenticationFailure { .. }));

    assert_eq!(backend.connects(), 0);
}

#[tokio::test]
async fn logoff_failure_does_not_mask_the_result() {
    let backend = FakeConnector::new();
    backend.respond("GetBatchJobLogs", json!({ "lines": ["started", "done"] }));
    backend.fail("Logoff", CallError::Transport("connection reset".into()));
    let (orchestrator, _pool) = orchestrator(&backend, None);

    let response = orchestrator
        .execute("get_logs", jdoe().with("run_id", "R-1"))
        .await
        .unwrap();

    assert_eq!(response.operation, OperationKind::GetLogs);
    assert_eq!(response.result["lines"][1], "done");
    assert_eq!(backend.count("Logoff"), 1);
}

#[tokio::test]
async fn status_is_returned_as_reported() {
    let backend = FakeConnector::new();
    backend.respond("GetBatchJobStatus", json!({ "run_id": "R-7", "state": "RUNNING" }));
    let (orchestrator, _pool) = orchestrator(&backend, None);

    let response = orchestrator
        .execute("get_status", jdoe().with("run_id", "R-7"))
        .await
        .unwrap();

    assert_eq!(response.result["state"], "RUNNING");
    assert_eq!(
        backend.last_request("GetBatchJobStatus").unwrap()["run_id"],
        "R-7"
    );
}

#[tokio::test]
async fn slow_operation_times_out_and_still_logs_off() {
    let backend = FakeConnector::new();
    backend.delay("RunBatchJob", Duration::from_millis(500));
    let (orchestrator, pool) = orchestrator(&backend, Some(Duration::from_millis(50)));

    let err = orchestrator
        .execute("run_job", jdoe().with("job", "NIGHTLY_LOAD"))
        .await
        .unwrap_err();

    assert!(matches!(err, BridgeError::TransportFailure(_)));
    assert_eq!(backend.operations(), ["Logon", "RunBatchJob", "Logoff"]);
    assert_eq!(pool.stats().busy, 0);

    // The timed-out call may still answer on that session; it is not reused.
    assert_eq!(pool.stats().live, 0);
    assert_eq!(backend.closes(), 1);

    orchestrator
        .execute("get_status", jdoe().with("run_id", "R-1"))
        .await
        .unwrap();
    assert_eq!(backend.connects(), 2);
}

#[tokio::test]
async fn cancelled_execute_still_logs_off() {
    let backend = FakeConnector::new();
    backend.delay("RunBatchJob", Duration::from_millis(500));
    let (orchestrator, pool) = orchestrator(&backend, None);

    let cancelled = timeout(
        Duration::from_millis(50),
        orchestrator.execute("run_job", jdoe().with("job", "NIGHTLY_LOAD")),
    )
    .await;
    assert!(cancelled.is_err());

    for _ in 0..40 {
        if backend.count("Logoff") == 1 && pool.stats().live == 0 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(backend.operations(), ["Logon", "RunBatchJob", "Logoff"]);
    assert_eq!(
        backend.last_request("Logoff").unwrap()["session_token"],
        "tok-1"
    );
    assert_eq!(pool.stats().busy, 0);
    assert_eq!(pool.stats().live, 0);
}
