//! rxnet demo
//!
//! Without arguments, drives a simulated host. With a URL, fetches it as JSON
//! through the native host:
//!
//! ```text
//! RUST_LOG=rxnet=debug cargo run --example basic -- http://127.0.0.1:8080/products
//! ```

use std::rc::Rc;

use rxnet::sim::SimHost;
use rxnet::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match std::env::args().nth(1) {
        Some(url) => native(&url),
        None => simulated(),
    }
}

fn print(label: &'static str) -> impl FnMut(Notification<ResponseEnvelope>) {
    move |notification| match notification {
        Notification::Next(envelope) => println!("[{label}] {} {:?}", envelope.status, envelope.response),
        Notification::Error(err) => println!("[{label}] error ({}): {err}", err.kind().as_str()),
        Notification::Completed => println!("[{label}] completed"),
    }
}

fn simulated() -> anyhow::Result<()> {
    let host = Rc::new(SimHost::new(TransportCapabilities::full()));
    let client = Client::new(host.clone());

    let _products = client
        .ajax(RequestOptions::new("/products").response_type(ResponseType::Json))
        .subscribe(print("products"));
    let _created = client.post("/products", json!({"name": "lamp"})).subscribe(print("create"));

    let transports = host.transports();
    if let Some(created) = transports.get(1) {
        println!("sent body: {}", created.sent_body().unwrap_or_default());
        created.respond(201, r#"{"id":2}"#);
    }
    if let Some(products) = transports.first() {
        products.progress(4, Some(8));
        products.respond(200, r#"[{"id":1}]"#);
    }

    let cancelled = client.get("/slow").subscribe(print("slow"));
    cancelled.unsubscribe();
    if let Some(slow) = host.last_transport() {
        println!("slow request aborted {} time(s)", slow.abort_calls());
    }

    let _search = client
        .jsonp_request("https://api.example/search?q=rust&callback=JSONPCallback")
        .subscribe(print("jsonp"));
    if let Some(document) = host.sim_document() {
        if let Some(script) = document.last_script() {
            println!("script src: {}", document.src(script).unwrap_or_default());
            document.load(script, Some(json!({"hits": 3})));
        }
    }

    Ok(())
}

fn native(url: &str) -> anyhow::Result<()> {
    let host = Rc::new(NativeHost::new(&Config::default())?);
    let client = Client::new(host.clone());

    let _subscription = client.get_json(url).subscribe(|notification| match notification {
        Notification::Next(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
        Notification::Error(err) => eprintln!("request failed: {err}"),
        Notification::Completed => {}
    });
    host.run();

    Ok(())
}
