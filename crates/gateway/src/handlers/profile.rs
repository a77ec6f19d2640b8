//! Profile handler

use crate::AppState;
use axum::{extract::State, Json};
use reef_common::{
    auth::AuthUser,
    db::{models::Profile, NewProfile},
    errors::Result,
};

/// The caller's profile, created with the starting balance on first access
pub async fn get_profile(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Profile>> {
    let profile = state
        .store
        .ensure_profile(NewProfile {
            id: auth.user_id,
            email: auth.email.clone(),
            credits: state.config.credits.starting_balance,
            whitelisted: state.config.auth.whitelist_new_profiles,
        })
        .await?;
    Ok(Json(profile))
}
