//! Mapping from the domain error taxonomy to HTTP responses.

use {
    axum::{
        Json,
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
    serde_json::json,
};

use parley_common::Error;

/// Wrapper giving domain errors an HTTP shape: the taxonomy maps to a
/// status code and the message lands in a `{ "detail": ... }` body.
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::Authz(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Storage(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(json!({ "detail": self.0.to_string() }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, axum::http::StatusCode};

    fn status_of(err: Error) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn taxonomy_maps_to_documented_statuses() {
        assert_eq!(status_of(Error::validation("x")), StatusCode::BAD_REQUEST);
        assert_eq!(status_of(Error::auth("x")), StatusCode::UNAUTHORIZED);
        assert_eq!(status_of(Error::authz("x")), StatusCode::FORBIDDEN);
        assert_eq!(status_of(Error::not_found("x")), StatusCode::NOT_FOUND);
        assert_eq!(status_of(Error::conflict("x")), StatusCode::CONFLICT);
        assert_eq!(status_of(Error::storage("x")), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status_of(Error::Persistence("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn unauthorized_carries_www_authenticate() {
        let response = ApiError(Error::auth("bad token")).into_response();
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).map(|v| v.to_str().ok()),
            Some(Some("Bearer"))
        );
    }
}
