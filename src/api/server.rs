use crate::api::routes;
use crate::config::SharedConfig;
use crate::control::ControlPlane;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: SharedConfig,
    pub control: Arc<ControlPlane>,
}

pub fn new(
    config: SharedConfig,
    control: Arc<ControlPlane>,
) -> impl Future<Output = hyper::Result<()>> {
    axum::Server::bind(&config.api_bind_addr).serve(
        routes::new(AppState { config, control })
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
}
