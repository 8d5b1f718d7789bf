//! HTTP tests for the npm registry client.
//!
//! Each test starts a tiny local server that answers a fixed number of
//! requests with canned responses and records the request lines it saw.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use lacona_addons::addons::{AddonError, NpmRegistry, RegistryProvider};
use pretty_assertions::assert_eq;

struct CannedServer {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl CannedServer {
    /// Serves one connection per response, in order.
    fn start(responses: Vec<(u16, Vec<u8>)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);

        let handle = thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                seen.lock().unwrap().push(request_line.trim_end().to_string());
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                        break;
                    }
                }

                let head = format!(
                    "HTTP/1.1 {} Canned\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                stream.write_all(&body).unwrap();
                stream.flush().unwrap();
            }
        });

        Self {
            base_url,
            requests,
            handle,
        }
    }

    fn registry(&self) -> NpmRegistry {
        NpmRegistry::new(&self.base_url, Duration::from_secs(5), "lacona-addons-test").unwrap()
    }

    fn finish(self) -> Vec<String> {
        self.handle.join().unwrap();
        Arc::try_unwrap(self.requests).unwrap().into_inner().unwrap()
    }
}

fn latest_body(base_url: &str, addon: bool) -> Vec<u8> {
    let mut document = serde_json::json!({
        "name": "lacona-todo",
        "version": "1.4.2",
        "dist": { "tarball": format!("{base_url}/lacona-todo/-/lacona-todo-1.4.2.tgz") }
    });
    if addon {
        document["lacona"] = serde_json::json!({ "title": "Todo" });
    }
    document.to_string().into_bytes()
}

#[test]
fn test_resolve_latest_addon() {
    let server = CannedServer::start(vec![(200, latest_body("https://cdn.test", true))]);
    let info = server.registry().resolve_latest("lacona-todo").unwrap();

    assert_eq!(info.name, "lacona-todo");
    assert_eq!(info.latest_version, "1.4.2");
    assert!(info.is_addon);
    assert_eq!(
        info.archive_url,
        "https://cdn.test/lacona-todo/-/lacona-todo-1.4.2.tgz"
    );
    assert_eq!(server.finish(), vec!["GET /lacona-todo/latest HTTP/1.1"]);
}

#[test]
fn test_resolve_missing_package() {
    let server = CannedServer::start(vec![(404, br#"{"error":"Not found"}"#.to_vec())]);

    let err = server.registry().resolve_latest("lacona-nope").unwrap_err();

    assert!(matches!(err, AddonError::NotFound(ref n) if n == "lacona-nope"));
    assert_eq!(err.exit_code(), 11);
    server.finish();
}

#[test]
fn test_resolve_non_addon() {
    let server = CannedServer::start(vec![(200, latest_body("http://unused", false))]);

    let err = server.registry().resolve_latest("lacona-todo").unwrap_err();

    assert!(matches!(err, AddonError::NotAnAddon(_)));
    server.finish();
}

#[test]
fn test_resolve_server_error() {
    let server = CannedServer::start(vec![(500, b"oops".to_vec())]);

    let err = server.registry().resolve_latest("lacona-todo").unwrap_err();

    assert!(matches!(err, AddonError::Network(_)));
    assert_eq!(err.exit_code(), 14);
    server.finish();
}

#[test]
fn test_resolve_garbage_body() {
    let server = CannedServer::start(vec![(200, b"<html>maintenance</html>".to_vec())]);

    let err = server.registry().resolve_latest("lacona-todo").unwrap_err();

    assert!(matches!(err, AddonError::MalformedManifest { .. }));
    server.finish();
}

#[test]
fn test_open_archive_streams_body() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    let server = CannedServer::start(vec![(200, payload.clone())]);
    let url = format!("{}/lacona-todo/-/lacona-todo-1.4.2.tgz", server.base_url);

    let mut stream = server.registry().open_archive(&url).unwrap();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).unwrap();

    assert_eq!(received.len(), payload.len());
    assert!(received == payload);
    assert_eq!(
        server.finish(),
        vec!["GET /lacona-todo/-/lacona-todo-1.4.2.tgz HTTP/1.1"]
    );
}

#[test]
fn test_open_archive_http_error() {
    let server = CannedServer::start(vec![(403, Vec::new())]);
    let url = format!("{}/private.tgz", server.base_url);

    let result = server.registry().open_archive(&url);

    assert!(matches!(result, Err(AddonError::Network(_))));
    server.finish();
}

#[test]
fn test_unreachable_registry() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let registry = NpmRegistry::new(&base, Duration::from_secs(2), "lacona-addons-test").unwrap();
    let err = registry.resolve_latest("lacona-todo").unwrap_err();

    assert!(matches!(err, AddonError::Network(_)));
}
