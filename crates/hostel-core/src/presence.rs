//! Presence derived from the log: who is inside, room occupancy, daily counts.

use crate::types::{Action, LogEntry, StudentRecord};
use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Inside,
    Outside,
}

impl PresenceState {
    /// A student with no log entries is outside.
    pub fn from_last_action(last: Option<Action>) -> Self {
        match last {
            Some(Action::Entry) => PresenceState::Inside,
            Some(Action::Exit) | None => PresenceState::Outside,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentPresence {
    pub id: i64,
    pub name: String,
    pub room: String,
    pub state: PresenceState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomOccupancy {
    pub room: String,
    pub inside: usize,
}

/// Dashboard aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceSummary {
    pub students: Vec<StudentPresence>,
    pub inside: usize,
    pub outside: usize,
    /// Occupied rooms only, ordered by [`compare_rooms`].
    pub rooms: Vec<RoomOccupancy>,
    pub entries_today: usize,
    pub exits_today: usize,
    pub visitors_today: usize,
}

impl PresenceSummary {
    /// Build the summary from registry order, each student's last action and the log.
    pub fn build<'a>(
        students: impl IntoIterator<Item = (&'a StudentRecord, Option<Action>)>,
        log: &[LogEntry],
        today: NaiveDate,
        visitors_today: usize,
    ) -> Self {
        let students: Vec<StudentPresence> = students
            .into_iter()
            .map(|(s, last)| StudentPresence {
                id: s.id,
                name: s.name.clone(),
                room: s.room.clone(),
                state: PresenceState::from_last_action(last),
            })
            .collect();

        let mut by_room: BTreeMap<String, usize> = BTreeMap::new();
        for s in students.iter().filter(|s| s.state == PresenceState::Inside) {
            *by_room.entry(s.room.clone()).or_default() += 1;
        }
        let mut rooms: Vec<RoomOccupancy> = by_room
            .into_iter()
            .map(|(room, inside)| RoomOccupancy { room, inside })
            .collect();
        rooms.sort_by(|a, b| compare_rooms(&a.room, &b.room));

        let inside = students
            .iter()
            .filter(|s| s.state == PresenceState::Inside)
            .count();
        let today_count = |action: Action| {
            log.iter()
                .filter(|e| e.action == action && e.timestamp.date() == today)
                .count()
        };

        Self {
            outside: students.len() - inside,
            inside,
            rooms,
            entries_today: today_count(Action::Entry),
            exits_today: today_count(Action::Exit),
            visitors_today,
            students,
        }
    }
}

/// Order rooms like `A-2 < A-10 < B-1`; names not shaped `<letters>-<number>`
/// compare by the whole name with number 0.
pub fn compare_rooms(a: &str, b: &str) -> Ordering {
    room_sort_key(a).cmp(&room_sort_key(b))
}

fn room_sort_key(room: &str) -> (&str, u64) {
    if let Some((block, rest)) = room.split_once('-') {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let is_block = !block.is_empty() && block.chars().all(|c| c.is_ascii_alphabetic());
        if is_block && digits_end > 0 {
            if let Ok(number) = rest[..digits_end].parse() {
                return (block, number);
            }
        }
    }
    (room, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, TIMESTAMP_FORMAT};
    use chrono::NaiveDateTime;

    fn student(id: i64, name: &str, room: &str) -> StudentRecord {
        StudentRecord {
            id,
            name: name.into(),
            roll: format!("R{id}"),
            room: room.into(),
            embedding: Embedding::new(vec![0.0]),
            photo: vec![1],
        }
    }

    fn entry(id: i64, student_id: i64, action: Action, ts: &str) -> LogEntry {
        LogEntry {
            id,
            student_id,
            name: String::new(),
            action,
            timestamp: NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).unwrap(),
        }
    }

    #[test]
    fn test_no_entries_means_outside() {
        assert_eq!(PresenceState::from_last_action(None), PresenceState::Outside);
        assert_eq!(
            PresenceState::from_last_action(Some(Action::Entry)),
            PresenceState::Inside
        );
        assert_eq!(
            PresenceState::from_last_action(Some(Action::Exit)),
            PresenceState::Outside
        );
    }

    #[test]
    fn test_room_ordering() {
        let mut rooms = vec!["B-1", "A-10", "Annex", "A-2"];
        rooms.sort_by(|a, b| compare_rooms(a, b));
        assert_eq!(rooms, vec!["A-2", "A-10", "Annex", "B-1"]);
    }

    #[test]
    fn test_summary_counts() {
        let students = vec![
            student(1, "Amy", "A-10"),
            student(2, "Ben", "A-2"),
            student(3, "Cal", "A-10"),
            student(4, "Dee", "B-1"),
        ];
        let last = [
            Some(Action::Entry),
            Some(Action::Entry),
            Some(Action::Entry),
            Some(Action::Exit),
        ];
        let log = vec![
            entry(1, 1, Action::Entry, "2026-10-19 07:00:00"),
            entry(2, 2, Action::Entry, "2026-10-19 07:10:00"),
            entry(3, 3, Action::Entry, "2026-10-18 21:00:00"),
            entry(4, 4, Action::Exit, "2026-10-19 08:00:00"),
        ];
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let summary = PresenceSummary::build(students.iter().zip(last), &log, today, 2);

        assert_eq!(summary.inside, 3);
        assert_eq!(summary.outside, 1);
        assert_eq!(summary.entries_today, 2);
        assert_eq!(summary.exits_today, 1);
        assert_eq!(summary.visitors_today, 2);
        assert_eq!(
            summary.rooms,
            vec![
                RoomOccupancy { room: "A-2".into(), inside: 1 },
                RoomOccupancy { room: "A-10".into(), inside: 2 },
            ]
        );
    }
}
