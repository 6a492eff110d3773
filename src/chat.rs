use ulid::Ulid;

use crate::engine::{Engine, now_local};
use crate::model::BookingStatus;

/// Canned-response assistant. Keyword matching over the lowercased message,
/// first match wins; two of the answers consult live store state so the
/// assistant can actually name free rooms and the caller's bookings.
pub async fn respond(engine: &Engine, user_id: Ulid, message: &str) -> String {
    let msg = message.to_lowercase();
    let (today, _) = now_local();

    if msg.contains("available") || msg.contains("free") || msg.contains("book") {
        let free = engine.rooms_free_on(today).await;
        if free.is_empty() {
            return "All rooms appear to be booked for today. Check the schedule page for open time slots on other days.".to_string();
        }
        return format!(
            "Rooms with no bookings today: {}. You can book them from the rooms page.",
            free.join(", ")
        );
    }

    if msg.contains("my booking") || msg.contains("reservation") {
        let mut mine: Vec<_> = engine
            .bookings_for_user(user_id)
            .await
            .into_iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
            .collect();
        if mine.is_empty() {
            return "You don't have any active bookings. Head to the rooms page to make one.".to_string();
        }
        mine.sort_by(|a, b| a.date.cmp(&b.date).then(a.start_time.cmp(&b.start_time)));
        let list = mine
            .iter()
            .map(|b| format!("{} on {} from {}–{}", b.room_name, b.date, b.start_time, b.end_time))
            .collect::<Vec<_>>()
            .join("\n");
        return format!("Your bookings:\n{list}");
    }

    if msg.contains("cancel") {
        return "You can cancel a booking from your account page — open your booking history and cancel from there.".to_string();
    }

    if msg.contains("schedule") || msg.contains("timetable") {
        return "The schedule page shows a per-day grid of every room: who has it and when, with free slots in between.".to_string();
    }

    if msg.contains("hello") || msg.contains("hi") || msg.contains("hey") {
        return "Hello! I can help you find available rooms, check your bookings, or explain how reservations work. What do you need?".to_string();
    }

    if msg.contains("help") {
        return "I can help with:\n- finding rooms that are free today\n- listing your current bookings\n- explaining the schedule grid\n- walking you through booking a room\nJust ask.".to_string();
    }

    "I'm here to help with room reservations. Try asking about available rooms, your bookings, or the schedule.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("aula_test_chat");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn names_free_rooms() {
        let engine = Engine::new(test_wal_path("free_rooms.wal")).unwrap();
        engine
            .create_room(Ulid::new(), "Classroom 301".into(), "301".into(), 40, String::new())
            .await
            .unwrap();

        let reply = respond(&engine, Ulid::new(), "anything available today?").await;
        assert!(reply.contains("Classroom 301"), "got: {reply}");
    }

    #[tokio::test]
    async fn reports_no_bookings() {
        let engine = Engine::new(test_wal_path("no_bookings.wal")).unwrap();
        let reply = respond(&engine, Ulid::new(), "show my bookings please").await;
        assert!(reply.contains("don't have any active bookings"), "got: {reply}");
    }

    #[tokio::test]
    async fn keyword_fallback() {
        let engine = Engine::new(test_wal_path("fallback.wal")).unwrap();
        let reply = respond(&engine, Ulid::new(), "what's the meaning of life?").await;
        assert!(reply.contains("room reservations"), "got: {reply}");
    }

    #[tokio::test]
    async fn cancel_guidance() {
        let engine = Engine::new(test_wal_path("cancel.wal")).unwrap();
        let reply = respond(&engine, Ulid::new(), "how do I cancel?").await;
        assert!(reply.contains("account page"), "got: {reply}");
    }
}
