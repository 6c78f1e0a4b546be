//! HTTP surface tests against a server bound to a free local port.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use docgen::config::Config;
use docgen::error::{PipelineError, Result};
use docgen::fetch::Cloner;
use docgen::generate::Generator;
use docgen::server::{router, run_server, AppState};
use docgen::session::Collaborators;
use docgen::storage::{MemoryStorer, Storer, MARKDOWN};

struct NoClone;

#[async_trait]
impl Cloner for NoClone {
    async fn materialize(&self, source: &str, _dest: &Path) -> Result<String> {
        Err(PipelineError::Fetch(format!("cannot clone {}", source)))
    }
}

struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(prompt.to_string())
    }
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

fn test_config(tmp: &TempDir, port: u16) -> Config {
    let mut cfg = Config::default();
    cfg.server.bind = format!("127.0.0.1:{}", port);
    cfg.workspace.root = tmp.path().join("workspace");
    cfg.storage.backend = "memory".to_string();
    cfg
}

/// Serve the router with in-process collaborators; returns the port.
async fn spawn_app(
    tmp: &TempDir,
    storer: Arc<MemoryStorer>,
    static_dir: Option<PathBuf>,
) -> u16 {
    let port = find_free_port();
    let cfg = test_config(tmp, port);
    let collaborators = Collaborators {
        cloner: Arc::new(NoClone),
        generator: Arc::new(EchoGenerator),
        storer,
    };
    let state = AppState::new(&cfg, collaborators).unwrap();
    let app = router(state, static_dir);

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    wait_for_server(port).await;
    port
}

#[tokio::test]
async fn test_health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let port = spawn_app(&tmp, Arc::new(MemoryStorer::new()), None).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_docs_serves_stored_markdown() {
    let tmp = TempDir::new().unwrap();
    let storer = Arc::new(MemoryStorer::new());
    storer
        .put("docs/docengine.md", "# docengine\n\nGenerated.", MARKDOWN)
        .await
        .unwrap();
    let port = spawn_app(&tmp, storer, None).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/docs?repo=docengine.md", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/markdown"));
    assert_eq!(resp.text().await.unwrap(), "# docengine\n\nGenerated.");
}

#[tokio::test]
async fn test_docs_error_contract() {
    let tmp = TempDir::new().unwrap();
    let port = spawn_app(&tmp, Arc::new(MemoryStorer::new()), None).await;
    let base = format!("http://127.0.0.1:{}", port);

    let cases = [
        ("/docs", 400, "bad_request"),
        ("/docs?repo=", 400, "bad_request"),
        ("/docs?repo=docengine", 400, "bad_request"),
        ("/docs?repo=..%2Fsecret.md", 400, "bad_request"),
        ("/docs?repo=unknown.md", 404, "not_found"),
    ];

    for (path, status, code) in cases {
        let resp = reqwest::get(format!("{}{}", base, path)).await.unwrap();
        assert_eq!(resp.status().as_u16(), status, "{}", path);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], code, "{}", path);
        assert!(body["error"]["message"].is_string());
    }
}

#[tokio::test]
async fn test_generate_requires_websocket_upgrade() {
    let tmp = TempDir::new().unwrap();
    let port = spawn_app(&tmp, Arc::new(MemoryStorer::new()), None).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/generate", port))
        .await
        .unwrap();
    assert!(resp.status().is_client_error());
}

#[tokio::test]
async fn test_static_directory_is_served_as_fallback() {
    let tmp = TempDir::new().unwrap();
    let public = tmp.path().join("public");
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(public.join("index.html"), "<h1>docgen</h1>").unwrap();

    let port = spawn_app(&tmp, Arc::new(MemoryStorer::new()), Some(public)).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/index.html", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "<h1>docgen</h1>");

    // API routes still win over the fallback.
    let resp = reqwest::get(format!("http://127.0.0.1:{}/health", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_run_server_starts_from_config() {
    let tmp = TempDir::new().unwrap();
    let port = find_free_port();
    let cfg = test_config(&tmp, port);

    tokio::spawn(async move {
        run_server(&cfg).await.ok();
    });
    wait_for_server(port).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/docs?repo=absent.md", port))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
