use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow, bail};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::event::{CalendarEvent, EventId};
use crate::storage::{EVENTS_KEY, Storage, THEME_KEY};

/// Owns the event collection and mirrors every change to storage.
///
/// The store is opened once, handed to whoever needs it, and released by
/// dropping it. Mutations build the next collection, flush it, and only
/// then replace the in-memory copy, so a failed write leaves the store
/// unchanged.
#[derive(Debug)]
pub struct EventStore<S: Storage> {
    storage: S,
    events: Vec<CalendarEvent>,
    unreadable: Vec<UnreadableRecord>,
}

/// A stored record that does not load as an event, typically because a
/// timestamp does not parse. It is kept verbatim, written back on every
/// flush, and never matches a calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableRecord {
    raw: Value,
}

impl UnreadableRecord {
    pub fn id(&self) -> Option<&str> {
        self.raw.get("id").and_then(Value::as_str)
    }

    pub fn title(&self) -> &str {
        self.field("title")
    }

    pub fn start(&self) -> &str {
        self.field("start")
    }

    pub fn end(&self) -> &str {
        self.field("end")
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn field(&self, key: &str) -> &str {
        self.raw.get(key).and_then(Value::as_str).unwrap_or_default()
    }
}

impl<S: Storage> EventStore<S> {
    #[tracing::instrument(skip(storage))]
    pub fn open(storage: S) -> Self {
        let (events, unreadable) = load_events(&storage);
        info!(
            count = events.len(),
            unreadable = unreadable.len(),
            "opened event store"
        );
        Self {
            storage,
            events,
            unreadable,
        }
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn unreadable(&self) -> &[UnreadableRecord] {
        &self.unreadable
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: &EventId) -> Option<&CalendarEvent> {
        self.events.iter().find(|event| &event.id == id)
    }

    pub fn get_unreadable(&self, id: &EventId) -> Option<&UnreadableRecord> {
        self.unreadable
            .iter()
            .find(|record| record.id() == Some(id.as_str()))
    }

    /// Resolves a full id or a unique id prefix, over events and unreadable
    /// records alike.
    pub fn resolve_id(&self, prefix: &str) -> anyhow::Result<EventId> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            bail!("event id cannot be empty");
        }

        let ids = self
            .events
            .iter()
            .map(|event| event.id.as_str())
            .chain(self.unreadable.iter().filter_map(UnreadableRecord::id))
            .collect::<BTreeSet<_>>();
        if ids.contains(prefix) {
            return Ok(EventId::from(prefix));
        }

        let mut matches = ids.iter().filter(|id| id.starts_with(prefix));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no event matches id {prefix}"))?;
        if matches.next().is_some() {
            bail!("event id prefix {prefix} is ambiguous");
        }
        Ok(EventId::from(*first))
    }

    #[tracing::instrument(skip(self, event), fields(id = %event.id))]
    pub fn add(&mut self, event: CalendarEvent) -> anyhow::Result<()> {
        validate(&event)?;
        if self.get(&event.id).is_some() || self.get_unreadable(&event.id).is_some() {
            bail!("an event with id {} already exists", event.id);
        }

        let mut next = self.events.clone();
        next.push(event);
        self.commit(next, self.unreadable.clone())
    }

    /// Replaces the event with the same id. Returns `false` (and writes
    /// nothing) when no such event exists.
    #[tracing::instrument(skip(self, updated), fields(id = %updated.id))]
    pub fn update(&mut self, updated: CalendarEvent) -> anyhow::Result<bool> {
        validate(&updated)?;
        let Some(idx) = self.events.iter().position(|e| e.id == updated.id) else {
            debug!("update target not found");
            return Ok(false);
        };

        let mut next = self.events.clone();
        next[idx] = updated;
        self.commit(next, self.unreadable.clone())?;
        Ok(true)
    }

    /// Removes the event or unreadable record with this id. Deleting an
    /// unknown id is a no-op that reports `false`.
    #[tracing::instrument(skip(self), fields(id = %id))]
    pub fn delete(&mut self, id: &EventId) -> anyhow::Result<bool> {
        if self.get(id).is_none() && self.get_unreadable(id).is_none() {
            debug!("delete target not found");
            return Ok(false);
        }

        let next = self
            .events
            .iter()
            .filter(|event| &event.id != id)
            .cloned()
            .collect();
        let unreadable = self
            .unreadable
            .iter()
            .filter(|record| record.id() != Some(id.as_str()))
            .cloned()
            .collect();
        self.commit(next, unreadable)?;
        Ok(true)
    }

    /// Drops every event and unreadable record; returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub fn clear(&mut self) -> anyhow::Result<usize> {
        let removed = self.events.len() + self.unreadable.len();
        self.commit(Vec::new(), Vec::new())?;
        info!(removed, "cleared all events");
        Ok(removed)
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    fn commit(
        &mut self,
        next: Vec<CalendarEvent>,
        unreadable: Vec<UnreadableRecord>,
    ) -> anyhow::Result<()> {
        let mut records = Vec::with_capacity(next.len() + unreadable.len());
        for event in &next {
            records.push(serde_json::to_value(event).context("failed to serialize events")?);
        }
        records.extend(unreadable.iter().map(|record| record.raw.clone()));

        let payload = serde_json::to_string(&records).context("failed to serialize events")?;
        self.storage
            .set_item(EVENTS_KEY, &payload)
            .context("failed to persist events")?;
        debug!(
            count = next.len(),
            unreadable = unreadable.len(),
            "persisted events"
        );
        self.events = next;
        self.unreadable = unreadable;
        Ok(())
    }
}

fn validate(event: &CalendarEvent) -> anyhow::Result<()> {
    if event.title.trim().is_empty() {
        bail!("event title cannot be empty");
    }
    Ok(())
}

#[tracing::instrument(skip(storage))]
fn load_events<S: Storage>(storage: &S) -> (Vec<CalendarEvent>, Vec<UnreadableRecord>) {
    let raw = match storage.get_item(EVENTS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return (Vec::new(), Vec::new()),
        Err(err) => {
            warn!(error = %format!("{err:#}"), "failed reading events; starting empty");
            return (Vec::new(), Vec::new());
        }
    };
    if raw.trim().is_empty() {
        return (Vec::new(), Vec::new());
    }

    let records: Vec<Value> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(err) => {
            warn!(error = %err, "stored events are corrupt; starting empty");
            return (Vec::new(), Vec::new());
        }
    };

    let mut seen = BTreeSet::new();
    let mut events = Vec::with_capacity(records.len());
    let mut unreadable = Vec::new();
    for (idx, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<CalendarEvent>(record.clone()) {
            Ok(event) => {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                } else {
                    warn!(index = idx, id = %event.id, "keeping duplicate event id as unreadable");
                    unreadable.push(UnreadableRecord { raw: record });
                }
            }
            Err(err) => {
                warn!(index = idx, error = %err, "keeping unreadable event record");
                unreadable.push(UnreadableRecord { raw: record });
            }
        }
    }

    debug!(count = events.len(), unreadable = unreadable.len(), "loaded events");
    (events, unreadable)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemePreference {
    #[default]
    Light,
    Dark,
}

impl ThemePreference {
    pub fn storage_value(self) -> &'static str {
        match self {
            ThemePreference::Light => "light",
            ThemePreference::Dark => "dark",
        }
    }

    pub fn from_storage_value(raw: &str) -> Option<Self> {
        match raw.trim() {
            "light" => Some(ThemePreference::Light),
            "dark" => Some(ThemePreference::Dark),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ThemePreference::Light => ThemePreference::Dark,
            ThemePreference::Dark => ThemePreference::Light,
        }
    }
}

impl fmt::Display for ThemePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_value())
    }
}

impl FromStr for ThemePreference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_storage_value(&s.to_ascii_lowercase())
            .ok_or_else(|| anyhow!("unknown theme: {s} (expected light or dark)"))
    }
}

#[derive(Debug)]
pub struct ThemeStore<S: Storage> {
    storage: S,
    theme: ThemePreference,
}

impl<S: Storage> ThemeStore<S> {
    /// Uses `fallback` when nothing usable is stored.
    #[tracing::instrument(skip(storage))]
    pub fn open(mut storage: S, fallback: ThemePreference) -> Self {
        let theme = match storage.get_item(THEME_KEY) {
            Ok(Some(raw)) => match ThemePreference::from_storage_value(&raw) {
                Some(theme) => theme,
                None => {
                    warn!(stored = %raw.trim(), "unrecognized stored theme; using fallback");
                    if let Err(err) = storage.remove_item(THEME_KEY) {
                        warn!(error = %format!("{err:#}"), "failed clearing stored theme");
                    }
                    fallback
                }
            },
            Ok(None) => fallback,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed reading theme; using fallback");
                fallback
            }
        };
        debug!(theme = %theme, "opened theme store");
        Self { storage, theme }
    }

    pub fn theme(&self) -> ThemePreference {
        self.theme
    }

    pub fn is_dark(&self) -> bool {
        self.theme == ThemePreference::Dark
    }

    #[tracing::instrument(skip(self))]
    pub fn set(&mut self, theme: ThemePreference) -> anyhow::Result<()> {
        self.storage
            .set_item(THEME_KEY, theme.storage_value())
            .context("failed to persist theme")?;
        self.theme = theme;
        Ok(())
    }

    pub fn toggle(&mut self) -> anyhow::Result<ThemePreference> {
        let next = self.theme.toggled();
        self.set(next)?;
        Ok(next)
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{EventStore, ThemePreference, ThemeStore};
    use crate::event::{EventDraft, EventId};
    use crate::storage::{EVENTS_KEY, MemoryStorage, Storage, THEME_KEY};

    fn draft(title: &str) -> crate::event::CalendarEvent {
        let slot = Utc.with_ymd_and_hms(2025, 3, 9, 9, 0, 0).single().expect("utc");
        EventDraft::at_slot(slot).with_title(title).build().expect("valid event")
    }

    #[test]
    fn mutations_are_flushed_and_reloaded() {
        let mut store = EventStore::open(MemoryStorage::new());
        let gym = draft("Gym");
        let call = draft("Call");
        store.add(gym.clone()).expect("add gym");
        store.add(call.clone()).expect("add call");

        let mut renamed = gym.clone();
        renamed.title = "Gym (legs)".to_string();
        assert!(store.update(renamed.clone()).expect("update"));
        assert!(store.delete(&call.id).expect("delete"));

        let reopened = EventStore::open(store.into_storage());
        assert_eq!(reopened.events(), &[renamed]);
    }

    #[test]
    fn missing_targets_are_no_ops() {
        let mut store = EventStore::open(MemoryStorage::new());
        store.add(draft("Gym")).expect("add");
        let ghost = draft("Ghost");

        assert!(!store.update(ghost.clone()).expect("update"));
        assert!(!store.delete(&EventId::from("nope")).expect("delete"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejects_duplicate_ids_and_blank_titles() {
        let mut store = EventStore::open(MemoryStorage::new());
        let gym = draft("Gym");
        store.add(gym.clone()).expect("add");
        assert!(store.add(gym.clone()).is_err());

        let mut blank = draft("x");
        blank.title = " ".to_string();
        assert!(store.add(blank).is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn clear_empties_storage() {
        let mut store = EventStore::open(MemoryStorage::new());
        store.add(draft("a")).expect("add");
        store.add(draft("b")).expect("add");
        assert_eq!(store.clear().expect("clear"), 2);
        assert!(store.is_empty());

        let storage = store.into_storage();
        assert_eq!(storage.get_item(EVENTS_KEY).expect("get").as_deref(), Some("[]"));
    }

    #[test]
    fn corrupt_or_partial_data_degrades_gracefully() {
        let mut storage = MemoryStorage::new();
        storage.set_item(EVENTS_KEY, "{not json").expect("set");
        assert!(EventStore::open(storage).is_empty());

        let mut storage = MemoryStorage::new();
        storage
            .set_item(
                EVENTS_KEY,
                r#"[
                    {"id":"a","title":"ok","start":"2025-03-01T10:00:00.000Z","end":"2025-03-01T11:00:00.000Z","category":"Work","isTask":false,"repeat":false},
                    {"id":"b","title":"bad","start":"yesterday-ish","end":"2025-03-01T11:00:00.000Z"},
                    {"id":"a","title":"dupe","start":"2025-03-01T10:00:00.000Z","end":"2025-03-01T11:00:00.000Z"}
                ]"#,
            )
            .expect("set");
        let store = EventStore::open(storage);
        assert_eq!(store.len(), 1);
        assert_eq!(store.events()[0].title, "ok");
        assert_eq!(store.unreadable().len(), 2);
        assert_eq!(store.unreadable()[0].title(), "bad");
        assert_eq!(store.unreadable()[0].start(), "yesterday-ish");
    }

    #[test]
    fn unreadable_records_survive_mutations() {
        let mut storage = MemoryStorage::new();
        storage
            .set_item(
                EVENTS_KEY,
                r#"[{"id":"keep","title":"Old","start":"not-a-date","end":"2025-03-01T11:00:00.000Z","category":"Work","isTask":false,"repeat":false,"extra":7}]"#,
            )
            .expect("set");

        let mut store = EventStore::open(storage);
        assert!(store.is_empty());
        store.add(draft("New")).expect("add");

        let reopened = EventStore::open(store.into_storage());
        assert_eq!(reopened.len(), 1);
        let kept = &reopened.unreadable()[0];
        assert_eq!(kept.id(), Some("keep"));
        assert_eq!(kept.start(), "not-a-date");
        assert_eq!(kept.raw()["extra"], 7);
    }

    #[test]
    fn unreadable_records_resolve_and_delete() {
        let mut storage = MemoryStorage::new();
        storage
            .set_item(EVENTS_KEY, r#"[{"id":"stale-1","title":"Old","start":"?","end":"?"}]"#)
            .expect("set");
        let mut store = EventStore::open(storage);

        let id = store.resolve_id("stale").expect("resolve");
        assert!(store.get_unreadable(&id).is_some());
        let mut twin = draft("Twin");
        twin.id = id.clone();
        assert!(store.add(twin).is_err());

        assert!(store.delete(&id).expect("delete"));
        assert!(store.unreadable().is_empty());
        let storage = store.into_storage();
        assert_eq!(storage.get_item(EVENTS_KEY).expect("get").as_deref(), Some("[]"));
    }

    #[test]
    fn resolves_unique_id_prefixes() {
        let mut store = EventStore::open(MemoryStorage::new());
        let mut a = draft("a");
        a.id = EventId::from("abc-1");
        let mut b = draft("b");
        b.id = EventId::from("abd-2");
        store.add(a).expect("add");
        store.add(b).expect("add");

        assert_eq!(store.resolve_id("abc").expect("resolve").as_str(), "abc-1");
        assert!(store.resolve_id("ab").is_err());
        assert!(store.resolve_id("zz").is_err());
    }

    #[test]
    fn theme_toggles_and_persists() {
        let mut themes = ThemeStore::open(MemoryStorage::new(), ThemePreference::Light);
        assert!(!themes.is_dark());
        assert_eq!(themes.toggle().expect("toggle"), ThemePreference::Dark);

        let storage = themes.into_storage();
        assert_eq!(storage.get_item(THEME_KEY).expect("get").as_deref(), Some("dark"));
        let reopened = ThemeStore::open(storage, ThemePreference::Light);
        assert!(reopened.is_dark());
    }

    #[test]
    fn unknown_theme_falls_back() {
        let mut storage = MemoryStorage::new();
        storage.set_item(THEME_KEY, "sepia").expect("set");
        let themes = ThemeStore::open(storage, ThemePreference::Dark);
        assert_eq!(themes.theme(), ThemePreference::Dark);

        let storage = themes.into_storage();
        assert_eq!(storage.get_item(THEME_KEY).expect("get"), None);
    }
}
