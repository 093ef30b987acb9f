//! Chromium environments over the DevTools HTTP endpoints.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::ResourceError;
use crate::resource::{EnvironmentHandle, RemoteEndpoint, ResourceProvider};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const READY_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Response of `GET /json/version`.
#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(rename = "Browser", default)]
    browser: String,
    #[serde(rename = "webSocketDebuggerUrl", default)]
    web_socket_debugger_url: Option<String>,
}

/// Launches local browsers and resolves remote ones.
#[derive(Debug, Clone)]
pub struct BrowserProvider {
    http: reqwest::Client,
    browser_path: String,
    headless: bool,
    proxy_server: Option<String>,
    ready_timeout: Duration,
    remote_timeout: Duration,
    public_endpoint: Option<String>,
}

impl BrowserProvider {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            browser_path: config.browser_path.clone(),
            headless: config.headless,
            proxy_server: config.proxy_server.clone(),
            ready_timeout: config.browser_ready_timeout,
            remote_timeout: config.remote_timeout,
            public_endpoint: config.public_cdp_endpoint.clone(),
        }
    }

    fn launch_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={}", port),
            "--remote-allow-origins=*".to_string(),
            "--remote-debugging-address=0.0.0.0".to_string(),
            "--no-sandbox".to_string(),
            "--no-first-run".to_string(),
            format!(
                "--user-data-dir={}",
                std::env::temp_dir()
                    .join(format!("relayrun-browser-{}", port))
                    .display()
            ),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        if let Some(proxy) = &self.proxy_server {
            args.push(format!("--proxy-server={}", proxy));
            args.push("--proxy-bypass-list=127.0.0.1,localhost".to_string());
        }
        args
    }

    async fn wait_until_ready(&self, port: u16, child: &mut Child) -> Result<VersionInfo, ResourceError> {
        let url = format!("http://127.0.0.1:{}/json/version", port);
        let deadline = Instant::now() + self.ready_timeout;
        let mut last_error = "no response".to_string();

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(ResourceError::NotReady {
                    port,
                    reason: format!("browser exited early ({})", status),
                });
            }

            match self.http.get(&url).timeout(READY_PROBE_TIMEOUT).send().await {
                Ok(response) if response.status().is_success() => {
                    return Ok(response.json().await?);
                }
                Ok(response) => last_error = format!("status {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }

            if Instant::now() >= deadline {
                return Err(ResourceError::NotReady {
                    port,
                    reason: last_error,
                });
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ResourceProvider for BrowserProvider {
    async fn acquire_local(&self, port: u16) -> Result<Box<dyn EnvironmentHandle>, ResourceError> {
        let args = self.launch_args(port);
        debug!(browser = %self.browser_path, ?args, "Starting browser");

        let mut child = Command::new(&self.browser_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let version = match self.wait_until_ready(port, &mut child).await {
            Ok(version) => version,
            Err(e) => {
                warn!(port, error = %e, "Browser failed readiness check, killing it");
                if let Err(kill_error) = child.kill().await {
                    warn!(port, error = %kill_error, "Failed to kill browser");
                }
                return Err(e);
            }
        };
        info!(port, browser = %version.browser, "Browser ready");

        Ok(Box::new(LocalBrowser {
            port,
            cdp_url: format!("http://127.0.0.1:{}", port),
            child: Some(child),
        }))
    }

    async fn acquire_remote(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> Result<Box<dyn EnvironmentHandle>, ResourceError> {
        let url = endpoint.version_url();
        debug!(url = %url, "Looking up remote browser");

        let response = self
            .http
            .get(&url)
            .timeout(self.remote_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResourceError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let version: VersionInfo = response.json().await?;
        let internal = version
            .web_socket_debugger_url
            .ok_or(ResourceError::MissingDebuggerUrl)?;
        let public = self
            .public_endpoint
            .as_deref()
            .unwrap_or(&endpoint.base_url);
        let cdp_url = translate_debugger_url(&internal, public)?;
        info!(internal = %internal, cdp_url = %cdp_url, "Remote browser resolved");

        Ok(Box::new(RemoteBrowser {
            http: self.http.clone(),
            endpoint: endpoint.clone(),
            cdp_url,
            timeout: self.remote_timeout,
            released: false,
        }))
    }
}

/// Rewrite the network location of `internal` to that of `public`,
/// keeping its path. A `public` without a scheme is taken as plain HTTP.
pub fn translate_debugger_url(internal: &str, public: &str) -> Result<String, ResourceError> {
    let invalid = |endpoint: &str, reason: String| ResourceError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let mut url = Url::parse(internal).map_err(|e| invalid(internal, e.to_string()))?;
    let public_url = if public.contains("://") {
        Url::parse(public)
    } else {
        Url::parse(&format!("http://{}", public))
    }
    .map_err(|e| invalid(public, e.to_string()))?;

    let host = public_url
        .host_str()
        .ok_or_else(|| invalid(public, "missing host".to_string()))?;
    let secure = matches!(public_url.scheme(), "https" | "wss");
    let scheme = match (url.scheme(), secure) {
        ("ws" | "wss", true) => "wss",
        ("ws" | "wss", false) => "ws",
        (_, true) => "https",
        (_, false) => "http",
    };

    url.set_scheme(scheme)
        .map_err(|_| invalid(internal, format!("cannot switch to {}", scheme)))?;
    url.set_host(Some(host))
        .map_err(|e| invalid(internal, e.to_string()))?;
    url.set_port(public_url.port())
        .map_err(|_| invalid(internal, "cannot set port".to_string()))?;
    Ok(url.to_string())
}

/// A browser process started by this supervisor.
struct LocalBrowser {
    port: u16,
    cdp_url: String,
    child: Option<Child>,
}

#[async_trait]
impl EnvironmentHandle for LocalBrowser {
    fn cdp_url(&self) -> &str {
        &self.cdp_url
    }

    fn describe(&self) -> String {
        format!("local:{}", self.port)
    }

    async fn release(&mut self) -> Result<(), ResourceError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        if let Some(status) = child.try_wait()? {
            debug!(port = self.port, %status, "Browser already exited");
            return Ok(());
        }
        child.kill().await?;
        info!(port = self.port, "Browser stopped");
        Ok(())
    }
}

/// A pre-provisioned browser behind an HTTP endpoint.
struct RemoteBrowser {
    http: reqwest::Client,
    endpoint: RemoteEndpoint,
    cdp_url: String,
    timeout: Duration,
    released: bool,
}

#[async_trait]
impl EnvironmentHandle for RemoteBrowser {
    fn cdp_url(&self) -> &str {
        &self.cdp_url
    }

    fn describe(&self) -> String {
        format!("remote:{}", self.endpoint.environment_url())
    }

    async fn release(&mut self) -> Result<(), ResourceError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let response = self
            .http
            .delete(self.endpoint.environment_url())
            .timeout(self.timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResourceError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{delete, get};
    use axum::{Json, Router};

    #[test]
    fn test_translate_to_secure_public_endpoint() {
        let url = translate_debugger_url(
            "ws://10.0.0.5:9222/devtools/browser/abc-123",
            "https://gw.example.com",
        )
        .unwrap();
        assert_eq!(url, "wss://gw.example.com/devtools/browser/abc-123");
    }

    #[test]
    fn test_translate_to_bare_host_and_port() {
        let url = translate_debugger_url(
            "ws://10.0.0.5:9222/devtools/browser/abc-123",
            "gw.example.com:8443",
        )
        .unwrap();
        assert_eq!(url, "ws://gw.example.com:8443/devtools/browser/abc-123");
    }

    #[test]
    fn test_translate_rejects_garbage() {
        assert!(matches!(
            translate_debugger_url("not a url", "https://gw.example.com"),
            Err(ResourceError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn test_launch_args() {
        let config = SupervisorConfig {
            proxy_server: Some("http://proxy:3128".to_string()),
            ..Default::default()
        };
        let args = BrowserProvider::from_config(&config).launch_args(9223);
        assert!(args.contains(&"--remote-debugging-port=9223".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--proxy-server=http://proxy:3128".to_string()));

        let config = SupervisorConfig {
            headless: false,
            ..Default::default()
        };
        let args = BrowserProvider::from_config(&config).launch_args(9224);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
        assert!(!args.iter().any(|a| a.starts_with("--proxy-server")));
    }

    #[tokio::test]
    async fn test_missing_browser_executable() {
        let config = SupervisorConfig {
            browser_path: "/nonexistent/relayrun-chromium".to_string(),
            ..Default::default()
        };
        let result = BrowserProvider::from_config(&config).acquire_local(9300).await;
        assert!(matches!(result, Err(ResourceError::Process(_))));
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    async fn version(Path(id): Path<String>) -> Result<Json<serde_json::Value>, StatusCode> {
        if id != "b-1" {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok(Json(serde_json::json!({
            "Browser": "Chrome/126.0",
            "webSocketDebuggerUrl": "ws://10.1.2.3:9222/devtools/browser/session-1"
        })))
    }

    async fn remove(State(deletes): State<Arc<AtomicUsize>>) -> StatusCode {
        deletes.fetch_add(1, Ordering::SeqCst);
        StatusCode::NO_CONTENT
    }

    fn app(deletes: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route("/v1/browsers/:id/json/version", get(version))
            .route("/v1/browsers/:id", delete(remove))
            .with_state(deletes)
    }

    #[tokio::test]
    async fn test_remote_lookup_translates_and_releases_once() {
        let deletes = Arc::new(AtomicUsize::new(0));
        let base = serve(app(deletes.clone())).await;

        let provider = BrowserProvider::from_config(&SupervisorConfig {
            public_cdp_endpoint: Some("https://cdp.example.com".to_string()),
            ..Default::default()
        });
        let mut handle = provider
            .acquire_remote(&RemoteEndpoint::new(format!("{}/v1/browsers", base), "b-1"))
            .await
            .unwrap();
        assert_eq!(
            handle.cdp_url(),
            "wss://cdp.example.com/devtools/browser/session-1"
        );

        handle.release().await.unwrap();
        handle.release().await.unwrap();
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_lookup_defaults_to_base_host() {
        let base = serve(app(Arc::default())).await;
        let provider = BrowserProvider::from_config(&SupervisorConfig::default());
        let handle = provider
            .acquire_remote(&RemoteEndpoint::new(format!("{}/v1/browsers", base), "b-1"))
            .await
            .unwrap();
        let expected = format!(
            "{}/devtools/browser/session-1",
            base.replace("http://", "ws://")
        );
        assert_eq!(handle.cdp_url(), expected);
    }

    #[tokio::test]
    async fn test_remote_lookup_non_success() {
        let base = serve(app(Arc::default())).await;
        let provider = BrowserProvider::from_config(&SupervisorConfig::default());
        let result = provider
            .acquire_remote(&RemoteEndpoint::new(format!("{}/v1/browsers", base), "missing"))
            .await;
        assert!(matches!(
            result,
            Err(ResourceError::UpstreamStatus { status: 404, .. })
        ));
    }
}
