//! Shared fixtures: a local HTTP server and test settings.

#![allow(dead_code)]

use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serpmine::config::Settings;

/// A tiny_http server answering with `handler(url)`. Stopped on drop.
pub struct TestServer {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestServer {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&str) -> (u16, String) + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(AtomicUsize::new(0));
        let counter = requests.clone();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || loop {
            if shutdown_rx.try_recv().is_ok() {
                break;
            }
            let request = match server.recv_timeout(Duration::from_millis(50)) {
                Ok(Some(req)) => req,
                Ok(None) => continue,
                Err(_) => break,
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = handler(request.url());
            let _ = request.respond(
                tiny_http::Response::from_string(body).with_status_code(status),
            );
        });

        Self {
            base_url,
            requests,
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A local URL nothing listens on.
pub fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

/// Settings rooted in `dir` with no retry waits and deterministic ranking.
pub fn test_settings(dir: &Path) -> Settings {
    let mut settings = Settings::with_data_dir(dir.to_path_buf());
    settings.request_timeout_secs = 5;
    settings.max_retries = 0;
    settings.backoff_base_ms = 0;
    settings.backoff_max_ms = 0;
    settings.random_seed = Some(7);
    settings.random_weight = 0.0;
    settings
}

/// One CDX row in the JSON array shape.
pub fn cdx_row(url: &str, timestamp: &str, status: u16) -> String {
    format!(
        r#"["{key}","{ts}","{url}","text/html","{status}","DIGEST{ts}","1000"]"#,
        key = url.replace("https://", ""),
        ts = timestamp,
        url = url,
        status = status
    )
}

pub const CDX_HEADER: &str =
    r#"["urlkey","timestamp","original","mimetype","statuscode","digest","length"]"#;

/// A CDX JSON array body with an optional trailing resume key.
pub fn cdx_body(rows: &[String], resume_key: Option<&str>) -> String {
    let mut parts = vec![CDX_HEADER.to_string()];
    parts.extend(rows.iter().cloned());
    if let Some(key) = resume_key {
        parts.push("[]".to_string());
        parts.push(format!(r#"["{}"]"#, key));
    }
    format!("[{}]", parts.join(",\n"))
}
