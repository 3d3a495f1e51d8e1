use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use std::{borrow::Cow, collections::BTreeMap};

/// Field name to the messages explaining why it was rejected.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

pub enum AppError {
    InternalServerError(anyhow::Error),
    ResponseStatusError(StatusCode, Cow<'static, str>),
    Validation(FieldErrors),
    /// Sends the client to the login form, returning to `came_from` after.
    LoginRequired { came_from: String },
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct AppErrorResponse {
            status: u16,
            message: Cow<'static, str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            fields: Option<FieldErrors>,
        }

        match self {
            AppError::InternalServerError(err) => {
                tracing::error!(error = ?err, "request failed");
                AppError::from(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
                    .into_response()
            }
            AppError::ResponseStatusError(code, s) => (
                code,
                Json(AppErrorResponse {
                    status: code.as_u16(),
                    message: s,
                    fields: None,
                }),
            )
                .into_response(),
            AppError::Validation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(AppErrorResponse {
                    status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                    message: "invalid form".into(),
                    fields: Some(fields),
                }),
            )
                .into_response(),
            AppError::LoginRequired { came_from } => {
                let came_from: String =
                    url::form_urlencoded::byte_serialize(came_from.as_bytes()).collect();
                Redirect::to(&format!("/login?came_from={came_from}")).into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> AppError {
        AppError::InternalServerError(e.into())
    }
}

impl AppError {
    pub fn from(code: StatusCode, s: impl Into<Cow<'static, str>>) -> AppError {
        AppError::ResponseStatusError(code, s.into())
    }

    pub fn not_found(what: &str) -> AppError {
        AppError::from(StatusCode::NOT_FOUND, format!("the {what} does not exist"))
    }

    pub fn forbidden() -> AppError {
        AppError::from(StatusCode::FORBIDDEN, "forbidden")
    }

    pub fn field(field: &str, message: impl Into<String>) -> AppError {
        let mut fields = FieldErrors::new();
        fields.insert(field.to_string(), vec![message.into()]);
        AppError::Validation(fields)
    }
}
