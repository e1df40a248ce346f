//! Native host tests against a local HTTP server

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::rc::Rc;
use std::thread;

use rxnet::*;
use serde_json::json;

type Log<T> = Rc<RefCell<Vec<Notification<T>>>>;

struct Request {
    method: String,
    target: String,
    body: String,
}

/// Serve every connection with `handler` on a background thread
fn serve(handler: fn(&Request) -> (u16, String)) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            if let Some(request) = read_request(&mut stream) {
                let (status, body) = handler(&request);
                let response = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        }
    });
    format!("http://{addr}")
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            return None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);
    while data.len() < header_end + content_length {
        let n = stream.read(&mut buf).ok()?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }

    let mut request_line = head.lines().next()?.split_whitespace();
    Some(Request {
        method: request_line.next()?.to_string(),
        target: request_line.next()?.to_string(),
        body: String::from_utf8_lossy(&data[header_end..]).to_string(),
    })
}

fn routes(request: &Request) -> (u16, String) {
    let url = url::Url::parse(&format!("http://localhost{}", request.target)).unwrap();
    match (request.method.as_str(), url.path()) {
        ("GET", "/products") => (200, r#"{"id":1}"#.to_string()),
        ("POST", "/echo") => (200, request.body.clone()),
        ("GET", "/jsonp") => {
            let callback = url
                .query_pairs()
                .find(|(key, _)| key == "cb")
                .map(|(_, value)| value.to_string())
                .unwrap_or_default();
            (200, format!("/**/{callback}({{\"ok\":true}});"))
        }
        ("GET", "/silent") => (200, "console.log('no callback')".to_string()),
        _ => (404, r#"{"error":"not found"}"#.to_string()),
    }
}

fn setup() -> (Rc<NativeHost>, Client, String) {
    let base = serve(routes);
    let host = Rc::new(NativeHost::new(&Config::default()).unwrap());
    let client = Client::new(host.clone());
    (host, client, base)
}

fn collect<T: 'static>(source: &Observable<T>) -> (Subscription, Log<T>) {
    let log: Log<T> = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    let subscription = source.subscribe(move |n| sink.borrow_mut().push(n));
    (subscription, log)
}

#[test]
fn test_native_get_json() {
    let (host, client, base) = setup();

    let (_subscription, log) = collect(&client.get_json(&format!("{base}/products")));
    assert_eq!(host.pending(), 1);
    host.run();

    let log = log.borrow();
    assert_eq!(log.len(), 2);
    assert!(matches!(&log[0], Notification::Next(value) if value == &json!({"id": 1})));
    assert!(matches!(log[1], Notification::Completed));
}

#[test]
fn test_native_post_echo_round_trip() {
    let (host, client, base) = setup();
    let value = json!({"name": "lamp", "tags": ["a", "b"]});

    let (_subscription, log) = collect(
        &client.ajax(
            RequestOptions::new(&format!("{base}/echo"))
                .method(Method::Post)
                .body(value.clone())
                .response_type(ResponseType::Json),
        ),
    );
    host.run();

    let log = log.borrow();
    match &log[0] {
        Notification::Next(envelope) => {
            assert_eq!(envelope.status, 200);
            assert_eq!(envelope.response, Payload::Json(value.clone()));
        }
        _ => panic!("expected a response"),
    }
}

#[test]
fn test_native_not_found_still_loads() {
    let (host, client, base) = setup();

    let (_subscription, log) = collect(&client.get(&format!("{base}/nowhere")));
    host.run();

    assert!(matches!(log.borrow().first(), Some(Notification::Next(envelope)) if envelope.status == 404));
}

#[test]
fn test_native_synchronous_request() {
    let (host, client, base) = setup();

    let (subscription, log) =
        collect(&client.ajax(RequestOptions::new(&format!("{base}/products")).asynchronous(false)));

    assert_eq!(host.pending(), 0);
    assert_eq!(log.borrow().len(), 2);
    assert!(subscription.is_closed());
}

#[test]
fn test_native_relative_url_fails() {
    let (host, client, _base) = setup();

    let (_subscription, log) = collect(&client.get("/relative"));

    assert_eq!(host.pending(), 0);
    assert!(matches!(
        log.borrow().first(),
        Some(Notification::Error(AjaxError::Host(HostError::InvalidUrl(_))))
    ));
}

#[test]
fn test_native_connection_refused() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let host = Rc::new(NativeHost::new(&Config::default()).unwrap());
    let client = Client::new(host.clone());

    let (_subscription, log) = collect(&client.get(&format!("http://127.0.0.1:{port}/")));
    host.run();

    let log = log.borrow();
    match &log[0] {
        Notification::Error(err) => {
            assert_eq!(err.kind(), ErrorKind::NetworkError);
            assert_eq!(err.status(), Some(0));
        }
        _ => panic!("expected a network error"),
    }
}

#[test]
fn test_native_unsubscribe_drops_completion() {
    let (host, client, base) = setup();

    let (subscription, log) = collect(&client.get(&format!("{base}/products")));
    assert_eq!(host.pending(), 1);
    subscription.unsubscribe();

    assert_eq!(host.pending(), 0);
    host.run();
    assert!(log.borrow().is_empty());
}

#[test]
fn test_native_jsonp() {
    let (host, client, base) = setup();

    let (_subscription, log) = collect(&client.jsonp_request(format!("{base}/jsonp?cb=JSONPCallback")));
    host.run();

    let log = log.borrow();
    assert!(matches!(&log[0], Notification::Next(envelope) if envelope.response == Payload::Json(json!({"ok": true}))));
    assert!(matches!(log[1], Notification::Completed));
    assert_eq!(host.native_document().script_count(), 0);
}

#[test]
fn test_native_jsonp_without_callback_call() {
    let (host, client, base) = setup();

    let (_subscription, log) = collect(&client.jsonp_request(format!("{base}/silent?cb=JSONPCallback")));
    host.run();

    let log = log.borrow();
    assert!(matches!(&log[0], Notification::Error(err) if err.status() == Some(400)));
}
