use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use catalog_harvester::app::Harvester;
use catalog_harvester::catalog::{CatalogWalker, CkanHttpClient, PagedListing};
use catalog_harvester::config::{ConfigLoader, HarvestConfig};
use catalog_harvester::error::HarvestError;
use catalog_harvester::fetch::RetryPolicy;

fn instant_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        min_wait: Duration::ZERO,
        max_wait: Duration::ZERO,
        max_attempts: Some(max_attempts),
    }
}

fn response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// Serves one canned response per connection and records each request line.
fn serve(responses: Vec<String>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    thread::spawn(move || {
        for response in responses {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            seen.lock().unwrap().push(line.trim_end().to_string());
            line.clear();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            stream.write_all(response.as_bytes()).unwrap();
        }
    });
    (format!("http://{addr}"), requests)
}

fn closed_port() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[test]
fn listing_advances_by_offset_until_empty_page() {
    let first = r#"{"success": true, "result": [
        {"name": "budget", "title": "Budget", "resources": []},
        {"name": "rain", "title": "Rainfall", "resources": []}
    ]}"#;
    let (url, requests) = serve(vec![
        response("200 OK", first),
        response("200 OK", r#"{"success": true, "result": []}"#),
    ]);
    let client = CkanHttpClient::new(&format!("{url}/"), Duration::from_secs(5), instant_policy(1))
        .unwrap();
    assert_eq!(client.base_url(), url);

    let datasets = CatalogWalker::new(&client)
        .items()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let names = datasets.iter().map(|d| d.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["budget", "rain"]);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].starts_with(
        "GET /api/3/action/current_package_list_with_resources?offset=0 "
    ));
    assert!(requests[1].contains("?offset=2 "));
}

#[test]
fn success_false_is_a_catalog_error() {
    let body = r#"{"success": false, "error": {"message": "Access denied"}}"#;
    let (url, _) = serve(vec![response("200 OK", body)]);
    let client = CkanHttpClient::new(&url, Duration::from_secs(5), instant_policy(1)).unwrap();

    assert_matches!(
        client.page(None),
        Err(HarvestError::CatalogHttp(message)) if message.contains("Access denied")
    );
}

#[test]
fn unavailable_listing_is_retried() {
    let (url, requests) = serve(vec![
        response("503 Service Unavailable", "{}"),
        response("200 OK", r#"{"success": true, "result": [{"name": "a", "title": "A"}]}"#),
    ]);
    let client = CkanHttpClient::new(&url, Duration::from_secs(5), instant_policy(3)).unwrap();

    let page = client.page(Some("40")).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.next.as_deref(), Some("41"));
    assert_eq!(requests.lock().unwrap().len(), 2);
}

#[test]
fn missing_endpoint_reports_status() {
    let (url, _) = serve(vec![response("404 Not Found", r#"{"error": "no such action"}"#)]);
    let client = CkanHttpClient::new(&url, Duration::from_secs(5), instant_policy(1)).unwrap();

    assert_matches!(
        client.page(None),
        Err(HarvestError::CatalogStatus { status: 404, .. })
    );
}

#[test]
fn instance_check_reports_unreachable_urls() {
    let (good, _) = serve(vec![response(
        "200 OK",
        r#"{"success": true, "result": [{"name": "a", "title": "A"}]}"#,
    )]);
    let down = closed_port();
    let json = format!(
        r#"{{"ckan_instances": {{"good": "{good}", "down": "{down}"}},
            "retry": {{"min_wait_secs": 0, "max_wait_secs": 0, "max_attempts": 1}}}}"#
    );
    let config: HarvestConfig = serde_json::from_str(&json).unwrap();
    let harvester = Harvester::new(ConfigLoader::resolve_config(config).unwrap());

    let checks = harvester.check_ckan_instances(None).unwrap();
    assert_eq!(checks.len(), 2);

    assert_eq!(checks[0].instance, "down");
    assert!(!checks[0].ok);
    assert_eq!(checks[0].url, down);
    assert!(checks[0].error.is_some());

    assert_eq!(checks[1].instance, "good");
    assert!(checks[1].ok);
    assert_eq!(checks[1].datasets_on_first_page, 1);
    assert_eq!(checks[1].error, None);

    assert_matches!(
        harvester.check_ckan_instances(Some("missing")),
        Err(HarvestError::UnknownInstance(_))
    );
}
