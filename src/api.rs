use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Extension, Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use ulid::Ulid;

use crate::auth::{self, TokenKeys};
use crate::chat;
use crate::engine::{Engine, EngineError, now_local};
use crate::limits::*;
use crate::model::*;
use crate::observability;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub keys: Arc<TokenKeys>,
}

// ── Error mapping ────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "success": false, "message": self.message }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(_) => Self::not_found("Not found."),
            EngineError::Conflict { existing, .. } => Self::conflict(format!(
                "Room already booked {}–{}.",
                existing.start, existing.end
            )),
            EngineError::Forbidden => Self::forbidden("Not authorized."),
            EngineError::Duplicate(field) => Self::bad_request(format!("{field} already exists.")),
            EngineError::Validation(msg) => Self::bad_request(msg),
            EngineError::LimitExceeded(msg) => Self::bad_request(format!("limit exceeded: {msg}")),
            EngineError::WalError(e) => {
                tracing::error!("WAL failure: {e}");
                Self::internal("Server error.")
            }
        }
    }
}

// ── Auth middleware ──────────────────────────────────────────────

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or_else(|| ApiError::unauthorized("Not authenticated. Please log in."))?;

    let user_id = state
        .keys
        .verify(&token)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token."))?;
    let user = state
        .engine
        .user(&user_id)
        .ok_or_else(|| ApiError::unauthorized("User no longer exists."))?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

fn require_admin(user: &User) -> Result<(), ApiError> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied. Admins only."))
    }
}

fn user_json(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "role": user.role,
        "createdAt": user.created_at,
    })
}

// ── Auth handlers ────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    username: String,
    email: String,
    password: String,
    confirm_password: String,
}

fn validate_registration(body: &RegisterBody) -> Result<(), ApiError> {
    let username = body.username.trim();
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::bad_request("Username must be 3-30 characters."));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::bad_request(
            "Username can only contain letters, numbers, and underscores.",
        ));
    }
    let email = body.email.trim();
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid_email || email.len() > MAX_EMAIL_LEN {
        return Err(ApiError::bad_request("Valid email is required."));
    }
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request("Password must be at least 8 characters."));
    }
    let has_lower = body.password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = body.password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = body.password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(ApiError::bad_request(
            "Password must contain uppercase, lowercase, and a number.",
        ));
    }
    if body.confirm_password != body.password {
        return Err(ApiError::bad_request("Passwords do not match."));
    }
    Ok(())
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&body)?;

    let password_hash = auth::hash_password(&body.password).map_err(|e| {
        tracing::error!("password hashing failed: {e}");
        ApiError::internal("Server error. Please try again.")
    })?;

    let user = state
        .engine
        .register_user(
            Ulid::new(),
            body.username.trim().to_string(),
            body.email.trim().to_lowercase(),
            password_hash,
            Role::Member,
        )
        .await?;

    let token = state
        .keys
        .issue(user.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "token": token, "user": user_json(&user) })),
    ))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .engine
        .user_by_email(&body.email.trim().to_lowercase())
        .filter(|u| auth::verify_password(&body.password, &u.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password."))?;

    let token = state
        .keys
        .issue(user.id)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(
        json!({ "success": true, "token": token, "user": user_json(&user) }),
    ))
}

async fn me(Extension(user): Extension<User>) -> impl IntoResponse {
    Json(json!({ "success": true, "user": user_json(&user) }))
}

async fn delete_account(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.delete_user(user.id).await?;
    Ok(Json(
        json!({ "success": true, "message": "Account deleted successfully." }),
    ))
}

#[derive(Deserialize)]
struct RenameBody {
    username: String,
}

async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<RenameBody>,
) -> Result<impl IntoResponse, ApiError> {
    let username = body.username.trim();
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::bad_request(
            "Username can only contain letters, numbers, and underscores.",
        ));
    }
    let updated = state
        .engine
        .rename_user(user.id, username.to_string())
        .await
        .map_err(|e| match e {
            EngineError::Duplicate(_) => ApiError::bad_request("Username already taken."),
            other => other.into(),
        })?;
    Ok(Json(json!({ "success": true, "user": user_json(&updated) })))
}

// ── Room handlers ────────────────────────────────────────────────

#[derive(Deserialize)]
struct DateQuery {
    date: Option<NaiveDate>,
}

async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> impl IntoResponse {
    let (today, now) = now_local();
    let date = query.date.unwrap_or(today);
    let rooms = state.engine.rooms_with_status(date, now).await;
    Json(json!({ "success": true, "data": rooms }))
}

async fn schedule(
    State(state): State<AppState>,
    Query(query): Query<DateQuery>,
) -> impl IntoResponse {
    let (today, _) = now_local();
    let date = query.date.unwrap_or(today);
    let (rooms, bookings) = state.engine.schedule(date).await;
    Json(json!({ "success": true, "rooms": rooms, "bookings": bookings }))
}

#[derive(Deserialize)]
struct CreateRoomBody {
    name: String,
    number: String,
    capacity: Option<u32>,
    description: Option<String>,
}

async fn create_room(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateRoomBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    let name = body.name.trim().to_string();
    let number = body.number.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Room name is required."));
    }
    if number.is_empty() {
        return Err(ApiError::bad_request("Room number is required."));
    }

    let id = Ulid::new();
    state
        .engine
        .create_room(
            id,
            name.clone(),
            number.clone(),
            body.capacity.unwrap_or(30),
            body.description.unwrap_or_default().trim().to_string(),
        )
        .await
        .map_err(|e| match e {
            EngineError::Duplicate(_) => {
                ApiError::bad_request("Room name or number already exists.")
            }
            other => other.into(),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": { "id": id, "name": name, "number": number } })),
    ))
}

async fn deactivate_room(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    state
        .engine
        .deactivate_room(id)
        .await
        .map_err(|e| match e {
            EngineError::NotFound(_) => ApiError::not_found("Room not found."),
            other => other.into(),
        })?;
    Ok(Json(json!({ "success": true, "message": "Room deactivated." })))
}

// ── Booking handlers ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateBookingBody {
    room_id: Ulid,
    date: NaiveDate,
    start_time: String,
    end_time: String,
    purpose: Option<String>,
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateBookingBody>,
) -> Result<impl IntoResponse, ApiError> {
    // Interval shape is the caller's to reject; the engine only sees
    // well-formed minute-resolution times.
    let start: TimeOfDay = body
        .start_time
        .parse()
        .map_err(|_| ApiError::bad_request("Start time must be HH:MM."))?;
    let end: TimeOfDay = body
        .end_time
        .parse()
        .map_err(|_| ApiError::bad_request("End time must be HH:MM."))?;
    if end <= start {
        return Err(ApiError::bad_request("End time must be after start time."));
    }

    let booking = state
        .engine
        .create_booking(
            Ulid::new(),
            body.room_id,
            user.id,
            body.date,
            Slot::new(start, end),
            body.purpose.unwrap_or_default().trim().to_string(),
        )
        .await
        .map_err(|e| {
            match &e {
                EngineError::Conflict { .. } => {
                    metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                }
                EngineError::NotFound(_) => return ApiError::not_found("Room not found."),
                _ => {}
            }
            e.into()
        })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "data": {
                "id": booking.id,
                "roomId": booking.room_id,
                "date": booking.date,
                "startTime": booking.slot.start,
                "endTime": booking.slot.end,
                "status": booking.status,
                "purpose": booking.purpose,
            }
        })),
    ))
}

async fn my_bookings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> impl IntoResponse {
    let bookings = state.engine.bookings_for_user(user.id).await;
    Json(json!({ "success": true, "data": bookings }))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .engine
        .cancel_booking(id, user.id, user.role.is_admin())
        .await
        .map_err(|e| match e {
            EngineError::NotFound(_) => ApiError::not_found("Booking not found."),
            other => other.into(),
        })?;
    Ok(Json(json!({ "success": true, "message": "Booking cancelled." })))
}

// ── Announcement handlers ────────────────────────────────────────

async fn list_announcements(State(state): State<AppState>) -> impl IntoResponse {
    let data = state.engine.list_announcements().await;
    Json(json!({ "success": true, "data": data }))
}

#[derive(Deserialize)]
struct AnnouncementBody {
    title: String,
    content: String,
}

async fn post_announcement(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<AnnouncementBody>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    let id = Ulid::new();
    state
        .engine
        .post_announcement(
            id,
            body.title.trim().to_string(),
            body.content.trim().to_string(),
            user.id,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": { "id": id } })),
    ))
}

async fn delete_announcement(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&user)?;
    state
        .engine
        .delete_announcement(id)
        .await
        .map_err(|e| match e {
            EngineError::NotFound(_) => ApiError::not_found("Announcement not found."),
            other => other.into(),
        })?;
    Ok(Json(json!({ "success": true, "message": "Deleted." })))
}

async fn toggle_like(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    let likes = state.engine.toggle_like(id, user.id).await.map_err(|e| {
        match e {
            EngineError::NotFound(_) => ApiError::not_found("Announcement not found."),
            other => other.into(),
        }
    })?;
    Ok(Json(json!({ "success": true, "likes": likes })))
}

async fn toggle_heart(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<Ulid>,
) -> Result<impl IntoResponse, ApiError> {
    let hearts = state.engine.toggle_heart(id, user.id).await.map_err(|e| {
        match e {
            EngineError::NotFound(_) => ApiError::not_found("Announcement not found."),
            other => other.into(),
        }
    })?;
    Ok(Json(json!({ "success": true, "hearts": hearts })))
}

// ── Assistant + health ───────────────────────────────────────────

#[derive(Deserialize)]
struct ChatBody {
    message: String,
}

async fn chat_handler(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(body): Json<ChatBody>,
) -> Result<impl IntoResponse, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("Message cannot be empty."));
    }
    if message.len() > MAX_CHAT_MESSAGE_LEN {
        return Err(ApiError::bad_request("Message too long."));
    }
    let response = chat::respond(&state.engine, user.id, message).await;
    Ok(Json(json!({ "success": true, "response": response })))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "success": true,
        "message": "aula API is running",
        "timestamp": chrono::Utc::now(),
    }))
}

// ── Router ───────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/health", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/announcements", get(list_announcements));

    let protected = Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/delete-account", delete(delete_account))
        .route("/api/rooms", get(list_rooms).post(create_room))
        .route("/api/rooms/schedule", get(schedule))
        .route("/api/rooms/{id}", delete(deactivate_room))
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/my", get(my_bookings))
        .route("/api/bookings/{id}", delete(cancel_booking))
        .route("/api/announcements", post(post_announcement))
        .route("/api/announcements/{id}", delete(delete_announcement))
        .route("/api/announcements/{id}/like", patch(toggle_like))
        .route("/api/announcements/{id}/heart", patch(toggle_heart))
        .route("/api/users/profile", patch(update_profile))
        .route("/api/ai/chat", post(chat_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(middleware::from_fn(observability::track_http))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
