use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Deserialize, Debug, Clone)]
pub(super) struct IssueRequest {
    pub domain: String,
}

#[derive(Deserialize, Debug, Clone)]
pub(super) struct ImportRequest {
    pub domain: String,
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Serialize, Debug, Clone)]
pub(super) struct PublicIpResponse {
    pub ip: IpAddr,
}

/// Envelope for collection responses.
#[derive(Serialize, Debug, Clone)]
pub(super) struct ListResponse<T> {
    pub data: Vec<T>,
    pub count: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        ListResponse {
            count: data.len(),
            data,
        }
    }
}
