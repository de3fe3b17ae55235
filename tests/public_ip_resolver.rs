use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use proxycrab::config::DynDnsConfig;
use proxycrab::dns::{HttpPublicIpResolver, PublicIpResolver};
use proxycrab::error::Error;
use std::net::{IpAddr, SocketAddr, TcpListener};
use std::time::Duration;

fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/down", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .route("/garbage", get(|| async { "<html>rate limited</html>" }))
        .route("/ip", get(|| async { "198.51.100.4\n" }))
        .route("/other", get(|| async { "203.0.113.9" }));
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);
    addr
}

fn resolver(addr: SocketAddr, primary: &str, fallbacks: &[&str]) -> HttpPublicIpResolver {
    let config = DynDnsConfig {
        public_ip_service: Some(format!("http://{addr}{primary}")),
        fallback_ip_services: fallbacks
            .iter()
            .map(|path| format!("http://{addr}{path}"))
            .collect(),
        request_timeout: Duration::from_secs(5),
        ..DynDnsConfig::default()
    };
    HttpPublicIpResolver::new(&config).unwrap()
}

#[tokio::test]
async fn failing_services_fall_through_in_order() {
    let addr = serve();
    let ip = resolver(addr, "/down", &["/garbage", "/ip", "/other"])
        .resolve()
        .await
        .unwrap();
    assert_eq!(ip, IpAddr::from([198, 51, 100, 4]));
}

#[tokio::test]
async fn working_primary_wins() {
    let addr = serve();
    let ip = resolver(addr, "/other", &["/ip"]).resolve().await.unwrap();
    assert_eq!(ip, IpAddr::from([203, 0, 113, 9]));
}

#[tokio::test]
async fn every_service_failing_is_an_error() {
    let addr = serve();
    let err = resolver(addr, "/down", &["/garbage"])
        .resolve()
        .await
        .unwrap_err();
    let Error::ExternalService { message, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(message.contains("every service failed"), "{message}");
    assert!(message.contains("not an IP address"), "{message}");
}
