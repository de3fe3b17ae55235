use axum::extract::Query;
use axum::routing::get;
use axum::Router;
use proxycrab::dns::NamecheapClient;
use proxycrab::error::Error;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::time::Duration;

// Namecheap labels its responses UTF-16 while sending UTF-8.
const SUCCESS: &str = r#"<?xml version="1.0" encoding="utf-16"?>
<interface-response>
  <Command>SETDNSHOST</Command>
  <Language>eng</Language>
  <IP>203.0.113.7</IP>
  <ErrCount>0</ErrCount>
  <errors />
  <ResponseCount>0</ResponseCount>
  <Done>true</Done>
  <debug><![CDATA[]]></debug>
</interface-response>"#;

const BAD_PASSWORD: &str = r#"<?xml version="1.0" encoding="utf-16"?>
<interface-response>
  <Command>SETDNSHOST</Command>
  <Language>eng</Language>
  <ErrCount>1</ErrCount>
  <errors>
    <Err1>Passwords do not match</Err1>
  </errors>
  <ResponseCount>1</ResponseCount>
  <Done>true</Done>
</interface-response>"#;

async fn update(Query(params): Query<HashMap<String, String>>) -> &'static str {
    let expected = [
        ("host", "app"),
        ("domain", "example.com"),
        ("password", "s3cret"),
        ("ip", "203.0.113.7"),
    ];
    if expected
        .iter()
        .all(|(k, v)| params.get(*k).map(String::as_str) == Some(*v))
    {
        SUCCESS
    } else {
        BAD_PASSWORD
    }
}

fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/update", get(update));
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);
    addr
}

fn client(addr: SocketAddr) -> NamecheapClient {
    NamecheapClient::new(format!("http://{addr}/update"), Duration::from_secs(5)).unwrap()
}

fn ip() -> IpAddr {
    IpAddr::from([203, 0, 113, 7])
}

#[tokio::test]
async fn mislabeled_success_response_is_accepted() {
    let addr = serve();
    client(addr)
        .update("app", "example.com", "s3cret", ip())
        .await
        .unwrap();
}

#[tokio::test]
async fn reported_errors_are_surfaced_without_the_password() {
    let addr = serve();
    let err = client(addr)
        .update("app", "example.com", "wrong", ip())
        .await
        .unwrap_err();
    let Error::ExternalService { message, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(message.contains("Passwords do not match"), "{message}");
    assert!(!err.to_string().contains("wrong"));
}

#[tokio::test]
async fn unreachable_endpoint_does_not_leak_the_password() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = client(addr)
        .update("app", "example.com", "s3cret", ip())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExternalService { .. }));
    assert!(!err.to_string().contains("s3cret"));
}
