use axum::{
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::auth::extractors::CurrentUser;
use crate::auth::handlers::{ENTRY_PAGE, LANDING_PAGE};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub welcome: String,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntryView {
    pub signup: &'static str,
    pub signin: &'static str,
    pub google: &'static str,
}

pub fn page_routes() -> Router<AppState> {
    Router::new()
        .route(LANDING_PAGE, get(dashboard))
        .route(ENTRY_PAGE, get(authenticate))
}

fn first_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

pub async fn dashboard(current: CurrentUser) -> Response {
    let CurrentUser { user, cookies } = current;
    match user {
        Some(u) => (
            cookies,
            Json(DashboardView {
                welcome: format!("Welcome, {}", first_name(&u.name)),
                name: u.name,
                email: u.email,
                picture: u.picture,
            }),
        )
            .into_response(),
        None => (cookies, Redirect::to(ENTRY_PAGE)).into_response(),
    }
}

pub async fn authenticate(current: CurrentUser) -> Response {
    let CurrentUser { user, cookies } = current;
    if user.is_some() {
        return (cookies, Redirect::to(LANDING_PAGE)).into_response();
    }
    (
        cookies,
        Json(EntryView {
            signup: "/api/auth/signup",
            signin: "/api/auth/signin",
            google: "/api/auth/google",
        }),
    )
        .into_response()
}
