use crate::error::Error;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub(crate) struct APIError(anyhow::Error);

impl IntoResponse for APIError {
    fn into_response(self) -> Response {
        let any_err = self.0;
        let status = match any_err.downcast_ref::<Error>() {
            Some(
                Error::Validation(_) | Error::NotDueForRenewal { .. } | Error::IpNotAllowed { .. },
            ) => StatusCode::BAD_REQUEST,
            Some(Error::NotFound { .. }) => StatusCode::NOT_FOUND,
            Some(Error::InactiveConfig(_) | Error::InactiveRecord(_)) => StatusCode::CONFLICT,
            Some(Error::InvalidProxyConfig(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(Error::ExternalService { .. }) => StatusCode::BAD_GATEWAY,
            Some(Error::JsonExtractorRejection(err)) => rejection_status(err),
            _ => any_err
                .downcast_ref::<JsonRejection>()
                .map_or(StatusCode::INTERNAL_SERVER_ERROR, rejection_status),
        };
        if status.is_server_error() {
            tracing::warn!("request failed: {any_err}");
        }
        let body = Json(json!({
            "error": format!("{any_err}"),
        }));
        (status, body).into_response()
    }
}

fn rejection_status(rejection: &JsonRejection) -> StatusCode {
    match rejection {
        JsonRejection::JsonDataError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        JsonRejection::JsonSyntaxError(_) => StatusCode::BAD_REQUEST,
        JsonRejection::MissingJsonContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl<E> From<E> for APIError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn status(err: Error) -> StatusCode {
        APIError::from(err).into_response().status()
    }

    #[test]
    fn statuses_follow_error_kind() {
        assert_eq!(status(Error::Validation("bad".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(Error::not_found("proxy route", 7)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status(Error::InactiveRecord(3)), StatusCode::CONFLICT);
        assert_eq!(
            status(Error::IpNotAllowed {
                ip: IpAddr::from([203, 0, 113, 7]),
                ranges: "10.0.0.0/8".into()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(Error::external("ACME", "rate limited")),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(Error::ReconciliationConflict("reload failed".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
