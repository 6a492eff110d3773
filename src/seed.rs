use tracing::info;
use ulid::Ulid;

use crate::auth;
use crate::engine::{Engine, EngineError};
use crate::model::Role;

const ADMIN_EMAIL: &str = "admin@example.edu";
const ADMIN_PASSWORD: &str = "Admin1234";

/// Seed demo data: an admin account, nine classrooms and a few sample
/// announcements. Only runs against an empty store, so restarting with the
/// seed flag still set does nothing.
pub async fn run(engine: &Engine) -> Result<(), EngineError> {
    if engine.user_count() > 0 || engine.room_count() > 0 {
        info!("store not empty, skipping seed");
        return Ok(());
    }

    let password_hash =
        auth::hash_password(ADMIN_PASSWORD).map_err(|e| EngineError::WalError(e.to_string()))?;
    let admin = engine
        .register_user(
            Ulid::new(),
            "admin".into(),
            ADMIN_EMAIL.into(),
            password_hash,
            Role::Admin,
        )
        .await?;
    info!("seeded admin account {ADMIN_EMAIL} / {ADMIN_PASSWORD}");

    for i in 1..=9 {
        engine
            .create_room(
                Ulid::new(),
                format!("Classroom 30{i}"),
                format!("30{i}"),
                40,
                "Lecture room on the 3rd floor".into(),
            )
            .await?;
    }
    info!("seeded 9 rooms (301-309)");

    let samples = [
        (
            "Reservation system is live",
            "Rooms 301-309 can now be booked online. Sign in and pick a time slot from the rooms page.",
        ),
        (
            "Assistant added",
            "The chat assistant can now tell you which rooms are free today and list your bookings.",
        ),
        (
            "Booking etiquette",
            "Please cancel bookings you no longer need so others can use the slot.",
        ),
    ];
    for (title, content) in samples {
        engine
            .post_announcement(Ulid::new(), title.into(), content.into(), admin.id)
            .await?;
    }
    info!("seeded {} announcements", samples.len());

    Ok(())
}
