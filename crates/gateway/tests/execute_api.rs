//! Integration tests for the HTTP surface against an in-memory runtime.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {serde_json::Value, tokio::net::TcpListener};

use {
    runbox_gateway::{GatewayState, build_gateway_app, serve},
    runbox_sandbox::{
        ExecOutput, Executor, ExecutorSettings, LanguageTable, RuntimeError, testing::FakeRuntime,
    },
};

const MAX_REQUEST_BYTES: usize = 4096;

fn settings() -> ExecutorSettings {
    ExecutorSettings {
        pool_size: 1,
        execution_timeout: Duration::from_secs(2),
        acquire_timeout: Duration::from_millis(100),
        stop_grace: Duration::from_secs(1),
        drain_timeout: Duration::from_secs(5),
        ..ExecutorSettings::default()
    }
}

async fn wait_warm(executor: &Executor) {
    for _ in 0..400 {
        if executor
            .pool_status()
            .iter()
            .all(|p| p.idle == p.capacity)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("sandbox pools never warmed up");
}

/// Start a test server over warm pools for every built-in language.
async fn start_server(
    runtime: &Arc<FakeRuntime>,
    settings: ExecutorSettings,
) -> (SocketAddr, Arc<Executor>) {
    let executor = Arc::new(Executor::new(
        Arc::clone(runtime) as _,
        &LanguageTable::builtin(),
        settings,
    ));
    wait_warm(&executor).await;

    let app = build_gateway_app(GatewayState::new(Arc::clone(&executor), MAX_REQUEST_BYTES));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, executor)
}

async fn post_execute(addr: SocketAddr, language: &str, code: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}/execute"))
        .json(&serde_json::json!({ "language": language, "code": code }))
        .send()
        .await
        .unwrap()
}

fn exited(output: &str, code: i32) -> Result<ExecOutput, RuntimeError> {
    Ok(ExecOutput {
        output: output.into(),
        exit_code: Some(code),
        timed_out: false,
    })
}

#[tokio::test]
async fn health_reports_every_pool() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["backend"], "fake");

    let pools = body["pools"].as_array().unwrap();
    assert_eq!(pools.len(), 5);
    assert_eq!(pools[0]["language"], "cpp");
    assert_eq!(pools[0]["idle"], 1);
    assert_eq!(pools[0]["state"], "running");
}

#[tokio::test]
async fn languages_lists_builtins_with_compile_flag() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let body: Value = reqwest::get(format!("http://{addr}/languages"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let languages = body.as_array().unwrap();
    let names: Vec<_> = languages
        .iter()
        .map(|l| l["language"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["cpp", "go", "java", "nodejs", "python3"]);

    let java = &languages[2];
    assert_eq!(java["extension"], "java");
    assert_eq!(java["compiled"], true);
    assert_eq!(languages[4]["compiled"], false);
}

#[tokio::test]
async fn completed_run_returns_output() {
    let runtime = FakeRuntime::new();
    runtime.on_exec(|_| exited("hello from the sandbox\n", 0));
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "python3", "print('hello from the sandbox')").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["output"], "hello from the sandbox\n");
    assert_eq!(body["exit_code"], 0);
    assert_eq!(body["succeeded"], true);

    let copies = runtime.copies();
    assert_eq!(copies.len(), 1);
    assert_eq!(copies[0].remote, "/tmp/script.py");
    assert_eq!(copies[0].contents, "print('hello from the sandbox')");
}

#[tokio::test]
async fn nonzero_exit_is_still_a_completed_run() {
    let runtime = FakeRuntime::new();
    runtime.on_exec(|_| exited("Traceback (most recent call last):\n", 1));
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "python3", "raise SystemExit(1)").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["exit_code"], 1);
    assert_eq!(body["succeeded"], false);
    assert!(body.get("kind").is_none());
}

#[tokio::test]
async fn unknown_language_is_a_bad_request() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "cobol", "DISPLAY 'HI'.").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "unsupported_language");
    assert!(body["error"].as_str().unwrap().contains("cobol"));
    assert!(runtime.copies().is_empty());
}

#[tokio::test]
async fn compile_failure_carries_compiler_output() {
    let runtime = FakeRuntime::new();
    runtime.on_exec(|argv| {
        if argv[0] == "javac" {
            exited("script.java:1: error: ';' expected\n", 1)
        } else {
            exited("unreachable\n", 0)
        }
    });
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "java", "class script { void main() }").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "compile_failed");
    assert_eq!(body["succeeded"], false);
    assert_eq!(body["output"], "script.java:1: error: ';' expected\n");
    assert!(
        runtime
            .execs()
            .iter()
            .all(|call| call.argv[0] != "java")
    );
}

#[tokio::test]
async fn command_that_cannot_start_is_a_run_failure() {
    let runtime = FakeRuntime::new();
    runtime.on_exec(|_| {
        Err(RuntimeError::LaunchFailed(
            "OCI runtime exec failed: exec: \"node\": executable file not found in $PATH".into(),
        ))
    });
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "nodejs", "console.log(1)").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "run_failed");
    assert!(body["output"].as_str().unwrap().contains("executable file not found"));
}

#[tokio::test]
async fn runtime_failure_is_a_server_error() {
    let runtime = FakeRuntime::new();
    runtime.on_exec(|_| {
        Err(RuntimeError::command_failed(
            "exec",
            "Error response from daemon: container is not running",
        ))
    });
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "go", "package main").await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "runtime_failed");
    assert!(body.get("output").is_none());
}

#[tokio::test]
async fn delivery_failure_is_a_server_error() {
    let runtime = FakeRuntime::new();
    runtime.fail_copies();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = post_execute(addr, "python3", "print(1)").await;
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "delivery_failed");
}

#[tokio::test]
async fn timeout_returns_partial_output() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(
        &runtime,
        ExecutorSettings {
            execution_timeout: Duration::from_millis(100),
            ..settings()
        },
    )
    .await;
    runtime.set_exec_delay(Duration::from_millis(400));

    let resp = post_execute(addr, "python3", "while True: pass").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "timeout");
    assert_eq!(body["succeeded"], false);
    assert_eq!(body["output"], "partial");
}

#[tokio::test]
async fn exhausted_pool_asks_clients_to_retry() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;
    runtime.set_exec_delay(Duration::from_millis(500));

    let slow = tokio::spawn(post_execute(addr, "python3", "import time; time.sleep(1)"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let resp = post_execute(addr, "python3", "print(2)").await;
    assert_eq!(resp.status(), 503);
    assert_eq!(resp.headers()["retry-after"], "1");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "pool_exhausted");

    assert_eq!(slow.await.unwrap().status(), 200);
}

#[tokio::test]
async fn malformed_body_is_rejected_before_execution() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/execute"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_request");
    assert!(runtime.copies().is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let code = "x".repeat(MAX_REQUEST_BYTES * 2);
    let resp = post_execute(addr, "python3", &code).await;
    assert_eq!(resp.status(), 413);
    assert!(runtime.copies().is_empty());
}

#[tokio::test]
async fn draining_executor_refuses_work() {
    let runtime = FakeRuntime::new();
    let (addr, executor) = start_server(&runtime, settings()).await;
    executor.shutdown().await;

    let resp = post_execute(addr, "python3", "print(1)").await;
    assert_eq!(resp.status(), 503);
    assert!(resp.headers().get("retry-after").is_none());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "shutting_down");

    let health: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "draining");
    assert!(
        health["pools"]
            .as_array()
            .unwrap()
            .iter()
            .all(|p| p["state"] == "terminated")
    );
}

#[tokio::test]
async fn shutdown_signal_destroys_every_sandbox() {
    let runtime = FakeRuntime::new();
    let executor = Arc::new(Executor::new(
        Arc::clone(&runtime) as _,
        &LanguageTable::builtin(),
        settings(),
    ));
    wait_warm(&executor).await;
    assert_eq!(runtime.live(), 5);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(serve(
        listener,
        GatewayState::new(Arc::clone(&executor), MAX_REQUEST_BYTES),
        async move {
            rx.await.ok();
        },
    ));

    let resp = post_execute(addr, "python3", "print(1)").await;
    assert_eq!(resp.status(), 200);

    tx.send(()).unwrap();
    server.await.unwrap().unwrap();

    assert!(executor.is_shutting_down());
    assert_eq!(runtime.live(), 0);
}

#[cfg(feature = "prometheus")]
#[tokio::test]
async fn metrics_endpoint_without_exporter_is_unavailable() {
    let runtime = FakeRuntime::new();
    let (addr, _executor) = start_server(&runtime, settings()).await;

    let resp = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
    assert_eq!(resp.status(), 503);
}
