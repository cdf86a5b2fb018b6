//! Redash source against a one-shot local HTTP server.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;

use battery_analytics::query::{QueryCache, QueryClient, QueryParams, QuerySource, RedashSource};

fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Serve one response, returning the base URL and the captured request.
fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        stream.write_all(response.as_bytes()).unwrap();
        request
    });
    (url, handle)
}

fn source(url: &str) -> RedashSource {
    RedashSource::new(url, "secret", Duration::from_secs(5)).unwrap()
}

fn client(url: &str) -> QueryClient {
    let cache = QueryCache::new(Duration::from_secs(300), 10);
    QueryClient::new(Arc::new(source(url)), Arc::new(Mutex::new(cache)))
}

#[tokio::test]
async fn posts_parameters_with_key_header() {
    let body = json!({"query_result": {"data": {"rows": [
        {"cell_id": 1, "regular_cycle_number": 1, "discharge_capacity": 2.0},
        {"cell_id": 1, "regular_cycle_number": 2, "discharge_capacity": 1.9}
    ]}}})
    .to_string();
    let (url, server) = serve_once("200 OK", &body);

    let params = QueryParams::new().with("cell_ids", "1");
    let table = source(&url).run("28", &params).await.unwrap();
    assert_eq!(table.height(), 2);
    assert_eq!(table.value(1, "discharge_capacity"), Some(json!(1.9)));

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /api/queries/28/results HTTP/1.1"));
    assert!(request.to_lowercase().contains("authorization: key secret"));
    assert!(request.contains(r#"{"parameters":{"cell_ids":"1"}}"#));
}

#[tokio::test]
async fn server_error_becomes_empty_table_and_is_not_cached() {
    let (url, server) = serve_once("500 Internal Server Error", r#"{"message": "boom"}"#);
    let client = client(&url);
    let table = client.fetch("24", &QueryParams::new()).await;
    server.join().unwrap();
    assert!(table.is_empty());
    assert!(client.cache().lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_becomes_empty_table() {
    let (url, server) = serve_once("200 OK", "<html>login</html>");
    let table = client(&url).fetch("24", &QueryParams::new()).await;
    server.join().unwrap();
    assert!(table.is_empty());
}

#[tokio::test]
async fn unreachable_service_becomes_empty_table() {
    let url = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    };
    let table = client(&url).fetch("24", &QueryParams::new()).await;
    assert!(table.is_empty());
}
