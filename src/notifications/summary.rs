//! Human-readable notification titles and bodies

use chrono::{DateTime, Utc};

use super::{Change, ChangeSubject};
use crate::models::TriggerType;

/// Title and body of an in-app notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub title: String,
    pub body: String,
}

/// `Jan 15, 14:00 – 16:00`, or `Jan 15, 22:00 – Jan 16, 02:00` across midnight (UTC)
pub fn format_time_range(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    if start.date_naive() == end.date_naive() {
        format!("{} – {}", start.format("%b %-d, %H:%M"), end.format("%H:%M"))
    } else {
        format!(
            "{} – {}",
            start.format("%b %-d, %H:%M"),
            end.format("%b %-d, %H:%M")
        )
    }
}

/// Describe `change` as performed by `actor`
pub fn describe(change: &Change, actor: &str) -> Summary {
    let event_name = change
        .event
        .as_ref()
        .map(|e| e.name.as_str())
        .unwrap_or("an event");

    match (&change.trigger, &change.subject) {
        (TriggerType::ShiftCreated, ChangeSubject::Shift(view)) => Summary {
            title: format!("New shift in {event_name}"),
            body: format!(
                "{actor} scheduled {} for {}: {}",
                view.assignee_name,
                view.team_name,
                format_time_range(view.shift.start, view.shift.end)
            ),
        },
        (TriggerType::ShiftUpdated, ChangeSubject::Shift(view)) => Summary {
            title: format!("Shift changed in {event_name}"),
            body: format!(
                "{actor} updated the {} shift of {}: {}",
                view.team_name,
                view.assignee_name,
                format_time_range(view.shift.start, view.shift.end)
            ),
        },
        (TriggerType::ShiftDeleted, ChangeSubject::Shift(view)) => Summary {
            title: format!("Shift removed from {event_name}"),
            body: format!(
                "{actor} removed {} from {}: {}",
                view.assignee_name,
                view.team_name,
                format_time_range(view.shift.start, view.shift.end)
            ),
        },
        (TriggerType::EventLocked, _) => Summary {
            title: format!("{event_name} is locked"),
            body: format!("{actor} locked the schedule. Shifts can no longer be changed."),
        },
        (TriggerType::EventUnlocked, _) => Summary {
            title: format!("{event_name} is unlocked"),
            body: format!("{actor} unlocked the schedule. Shifts can be edited again."),
        },
        (TriggerType::CoverageUpdated, ChangeSubject::Coverage { team, requirements }) => {
            Summary {
                title: format!("Staffing targets changed in {event_name}"),
                body: format!(
                    "{actor} set {} staffing window(s) for {}",
                    requirements.len(),
                    team.name
                ),
            }
        }
        (trigger, _) => Summary {
            title: format!("Update: {trigger}"),
            body: format!("{actor} made a change ({trigger})"),
        },
    }
}
