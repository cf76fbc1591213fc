use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail};
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datastore::ThemePreference;
use crate::datetime::iso_timestamp_serde;

/// Opaque event identifier. New ids are v4 UUIDs, but any string read back
/// from storage is accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EventId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EventId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    #[default]
    Work,
    Personal,
    Health,
    Social,
    Other,
}

impl Category {
    pub fn all() -> [Category; 5] {
        [
            Category::Work,
            Category::Personal,
            Category::Health,
            Category::Social,
            Category::Other,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Work => "Work",
            Category::Personal => "Personal",
            Category::Health => "Health",
            Category::Social => "Social",
            Category::Other => "Other",
        }
    }

    /// ANSI SGR code used to paint the category; dark terminals get the
    /// brighter variant.
    pub fn color_code(self, theme: ThemePreference) -> &'static str {
        match (self, theme) {
            (Category::Work, ThemePreference::Light) => "38;5;27",
            (Category::Work, ThemePreference::Dark) => "38;5;75",
            (Category::Personal, ThemePreference::Light) => "38;5;162",
            (Category::Personal, ThemePreference::Dark) => "38;5;211",
            (Category::Health, ThemePreference::Light) => "38;5;28",
            (Category::Health, ThemePreference::Dark) => "38;5;114",
            (Category::Social, ThemePreference::Light) => "38;5;91",
            (Category::Social, ThemePreference::Dark) => "38;5;141",
            (Category::Other, ThemePreference::Light) => "38;5;240",
            (Category::Other, ThemePreference::Dark) => "38;5;250",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::all()
            .into_iter()
            .find(|category| category.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                anyhow!("unknown category: {s} (expected Work, Personal, Health, Social or Other)")
            })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn name(self) -> &'static str {
        match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        }
    }

    pub fn color_code(self) -> &'static str {
        match self {
            Priority::Low => "32",
            Priority::Medium => "33",
            Priority::High => "31",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Priority::Low, Priority::Medium, Priority::High]
            .into_iter()
            .find(|priority| priority.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown priority: {s} (expected Low, Medium or High)"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: EventId,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(with = "iso_timestamp_serde")]
    pub start: DateTime<Utc>,

    #[serde(with = "iso_timestamp_serde")]
    pub end: DateTime<Utc>,

    #[serde(default)]
    pub category: Category,

    #[serde(default)]
    pub is_task: bool,

    /// Only meaningful for tasks; kept as-is on plain events.
    #[serde(default)]
    pub priority: Option<Priority>,

    /// Stored and shown, never expanded into occurrences.
    #[serde(default)]
    pub repeat: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CalendarEvent {
    pub fn effective_priority(&self) -> Option<Priority> {
        if self.is_task { self.priority } else { None }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// Form state for a new event, prefilled the way the editor opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub title: String,
    pub description: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub category: Category,
    pub is_task: bool,
    pub priority: Priority,
    pub repeat: bool,
}

impl EventDraft {
    /// Starts at the top of the slot's hour (in the slot's own zone) and
    /// lasts one hour.
    pub fn at_slot<Z: TimeZone>(slot: DateTime<Z>) -> Self {
        let top_of_hour = slot
            .with_minute(0)
            .and_then(|dt| dt.with_second(0))
            .and_then(|dt| dt.with_nanosecond(0))
            .unwrap_or_else(|| slot.clone())
            .with_timezone(&Utc);

        Self {
            title: String::new(),
            description: String::new(),
            start: top_of_hour,
            // The last representable hour gets a zero-length slot.
            end: top_of_hour
                .checked_add_signed(Duration::hours(1))
                .unwrap_or(top_of_hour),
            category: Category::Work,
            is_task: false,
            priority: Priority::Medium,
            repeat: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn build(self) -> anyhow::Result<CalendarEvent> {
        let title = self.title.trim();
        if title.is_empty() {
            bail!("event title cannot be empty");
        }

        Ok(CalendarEvent {
            id: EventId::generate(),
            title: title.to_string(),
            description: self.description,
            start: self.start,
            end: self.end,
            category: self.category,
            is_task: self.is_task,
            priority: Some(self.priority),
            repeat: self.repeat,
            color: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use chrono_tz::Tz;

    use super::{CalendarEvent, Category, EventDraft, Priority};

    #[test]
    fn draft_defaults_match_new_event_form() {
        let tz: Tz = chrono_tz::Europe::Berlin;
        let slot = tz
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2025, 3, 9)
                    .and_then(|d| d.and_hms_opt(14, 37, 12))
                    .expect("valid slot"),
            )
            .single()
            .expect("unambiguous slot");

        let draft = EventDraft::at_slot(slot);
        assert_eq!(
            draft.start,
            Utc.with_ymd_and_hms(2025, 3, 9, 13, 0, 0).single().expect("utc")
        );
        assert_eq!(draft.end - draft.start, chrono::Duration::hours(1));
        assert_eq!(draft.category, Category::Work);
        assert_eq!(draft.priority, Priority::Medium);
        assert!(!draft.is_task);
        assert!(!draft.repeat);
    }

    #[test]
    fn build_rejects_blank_titles() {
        let slot = Utc.with_ymd_and_hms(2025, 3, 9, 9, 0, 0).single().expect("utc");
        assert!(EventDraft::at_slot(slot).with_title("   ").build().is_err());

        let event = EventDraft::at_slot(slot)
            .with_title("  Standup ")
            .build()
            .expect("valid draft");
        assert_eq!(event.title, "Standup");
        assert!(!event.id.as_str().is_empty());
    }

    #[test]
    fn priority_only_counts_for_tasks() {
        let slot = Utc.with_ymd_and_hms(2025, 3, 9, 9, 0, 0).single().expect("utc");
        let mut event = EventDraft::at_slot(slot)
            .with_title("Dentist")
            .build()
            .expect("valid draft");
        event.priority = Some(Priority::High);
        assert_eq!(event.effective_priority(), None);
        event.is_task = true;
        assert_eq!(event.effective_priority(), Some(Priority::High));
    }

    #[test]
    fn json_uses_camel_case_fields() {
        let raw = r#"{
            "id": "0f3c",
            "title": "Gym",
            "description": "",
            "start": "2025-03-01T07:00:00.000Z",
            "end": "2025-03-01T08:00:00.000Z",
            "category": "Health",
            "isTask": true,
            "priority": "Low",
            "repeat": true
        }"#;
        let event: CalendarEvent = serde_json::from_str(raw).expect("parse event");
        assert_eq!(event.id.as_str(), "0f3c");
        assert_eq!(event.category, Category::Health);
        assert!(event.is_task);
        assert!(event.repeat);

        let value = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(value["isTask"], true);
        assert_eq!(value["start"], "2025-03-01T07:00:00.000Z");
        assert!(value.get("color").is_none());
    }

    #[test]
    fn categories_parse_case_insensitively() {
        assert_eq!("social".parse::<Category>().expect("parse"), Category::Social);
        assert!("chores".parse::<Category>().is_err());
        assert_eq!("HIGH".parse::<Priority>().expect("parse"), Priority::High);
    }
}
