use crate::{
    auth::SessionKeys,
    config::Settings,
    directory::Directory,
    error::{AppError, AppResult},
};
use axum::{extract::Path, http::StatusCode, routing::get, Extension, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

#[derive(Serialize)]
struct VerificationRequested {
    email: String,
    message: &'static str,
}

#[derive(Serialize)]
struct VerificationResult {
    email: String,
    verified: bool,
}

fn verification_link(public_host: &Url, email: &str, token: &str) -> anyhow::Result<Url> {
    let mut link = public_host.clone();
    link.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("public host `{public_host}` cannot be a base url"))?
        .pop_if_empty()
        .extend(["verify_email", email, token]);
    Ok(link)
}

/// Issues a verification link. The response never says whether an account
/// uses the address.
async fn request(
    Extension(directory): Extension<Directory>,
    Extension(keys): Extension<Arc<SessionKeys>>,
    Extension(settings): Extension<Arc<Settings>>,
    Path(email): Path<String>,
) -> AppResult<(StatusCode, Json<VerificationRequested>)> {
    let email = email.trim().to_lowercase();
    if directory.account_by_email(&email).await?.is_some() {
        let token = keys.verification_token(&email)?;
        let link = verification_link(&settings.public_host, &email, &token)?;
        // no mail transport; operators hand the link on
        tracing::info!(%email, %link, "email verification link issued");
    } else {
        tracing::debug!(%email, "verification requested for unknown email");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(VerificationRequested {
            email,
            message: "if an account uses this address a verification link has been issued",
        }),
    ))
}

async fn redeem(
    Extension(directory): Extension<Directory>,
    Extension(keys): Extension<Arc<SessionKeys>>,
    Path((email, token)): Path<(String, String)>,
) -> AppResult<Json<VerificationResult>> {
    let email = email.trim().to_lowercase();
    if !keys.verifies_email(&token, &email) {
        return Err(AppError::from(
            StatusCode::UNAUTHORIZED,
            "the verification link is invalid or has expired",
        ));
    }

    let mut account = directory
        .account_by_email(&email)
        .await?
        .ok_or_else(|| AppError::not_found("account"))?;
    if let Some(fields) = account.account_mut() {
        if !fields.email_verified {
            fields.email_verified = true;
            directory.save_entity(&account).await?;
            tracing::info!(id = %account.id(), "email verified");
        }
    }

    Ok(Json(VerificationResult {
        email,
        verified: true,
    }))
}

pub fn app() -> Router {
    Router::new()
        .route("/verify_email/:email", get(request))
        .route("/verify_email/:email/:token", get(redeem).post(redeem))
}
