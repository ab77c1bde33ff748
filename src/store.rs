use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

/// Serde helper for calendar days; records carry dates without a time of day.
pub(crate) mod day_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub(crate) fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = date
            .format(super::DAY_FORMAT)
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Date, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Date::parse(&raw, super::DAY_FORMAT).map_err(serde::de::Error::custom)
    }
}

pub(crate) const DAY_FORMAT: &[time::format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day]");

pub(crate) fn parse_day(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), DAY_FORMAT).ok()
}

pub(crate) fn format_day(day: Date) -> String {
    day.format(DAY_FORMAT).expect("format calendar day")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordKind {
    Message,
    Challenge,
}

impl RecordKind {
    pub(crate) fn dir(self) -> &'static str {
        match self {
            Self::Message => "messages",
            Self::Challenge => "challenges",
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Challenge => "challenge",
        }
    }
}

/// `{kind}_{ISO-date}_{creation-timestamp}`, so several same-day records never
/// collide on id.
pub(crate) fn record_id(kind: RecordKind, date: Date, created_at: OffsetDateTime) -> String {
    format!(
        "{}_{}_{}",
        kind.prefix(),
        format_day(date),
        created_at.unix_timestamp()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MessageKind {
    Text,
    Image,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ViewEvent {
    pub(crate) user_id: String,
    pub(crate) display_name: String,
    pub(crate) email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) timestamp: OffsetDateTime,
}

// Scalar fields stay ahead of `views` so the TOML serializer never emits a
// value after an array of tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Message {
    #[serde(default)]
    pub(crate) id: String,
    pub(crate) text: String,
    #[serde(with = "day_format")]
    pub(crate) date: Date,
    #[serde(rename = "type")]
    pub(crate) kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) media_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) created_at: OffsetDateTime,
    #[serde(default)]
    pub(crate) views: Vec<ViewEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponseEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) file_url: Option<String>,
    pub(crate) display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) photo_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Challenge {
    #[serde(default)]
    pub(crate) id: String,
    pub(crate) prompt: String,
    #[serde(with = "day_format")]
    pub(crate) date: Date,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) created_at: OffsetDateTime,
    #[serde(default)]
    pub(crate) responses: BTreeMap<String, ResponseEntry>,
}

#[derive(Debug)]
pub(crate) enum StoreError {
    NotFound,
    BadId,
    Parse(toml::de::Error),
    Encode(toml::ser::Error),
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound => f.write_str("record not found"),
            StoreError::BadId => f.write_str("invalid record id"),
            StoreError::Parse(err) => write!(f, "corrupt record: {err}"),
            StoreError::Encode(err) => write!(f, "failed to encode record: {err}"),
            StoreError::Io(err) => write!(f, "store io error: {err}"),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

/// Filesystem-backed record store. One TOML document per record under
/// `{root}/{kind}/{id}.toml`. Mutations take an internal write lock and go
/// through load-mutate-rewrite, so concurrent viewers appending views or
/// setting their own response entry never clobber each other.
#[derive(Clone)]
pub(crate) struct ContentStore {
    root: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl ContentStore {
    pub(crate) fn new(root: PathBuf) -> Self {
        Self {
            root,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn list_messages(&self) -> Result<Vec<Message>, StoreError> {
        let mut messages: Vec<Message> = self.load_all(RecordKind::Message)?;
        messages.sort_by(|a, b| {
            (a.date, a.created_at, &a.id).cmp(&(b.date, b.created_at, &b.id))
        });
        Ok(messages)
    }

    pub(crate) fn list_challenges(&self) -> Result<Vec<Challenge>, StoreError> {
        let mut challenges: Vec<Challenge> = self.load_all(RecordKind::Challenge)?;
        challenges.sort_by(|a, b| {
            (a.date, a.created_at, &a.id).cmp(&(b.date, b.created_at, &b.id))
        });
        Ok(challenges)
    }

    pub(crate) fn messages_on(&self, day: Date) -> Result<Vec<Message>, StoreError> {
        let mut messages = self.list_messages()?;
        messages.retain(|message| message.date == day);
        Ok(messages)
    }

    pub(crate) fn challenges_on(&self, day: Date) -> Result<Vec<Challenge>, StoreError> {
        let mut challenges = self.list_challenges()?;
        challenges.retain(|challenge| challenge.date == day);
        Ok(challenges)
    }

    pub(crate) fn get_message(&self, id: &str) -> Result<Message, StoreError> {
        let mut message: Message = self.load_one(RecordKind::Message, id)?;
        message.id = id.to_string();
        Ok(message)
    }

    pub(crate) fn get_challenge(&self, id: &str) -> Result<Challenge, StoreError> {
        let mut challenge: Challenge = self.load_one(RecordKind::Challenge, id)?;
        challenge.id = id.to_string();
        Ok(challenge)
    }

    pub(crate) fn create_message(&self, message: &Message) -> Result<(), StoreError> {
        self.create(RecordKind::Message, &message.id, message)
    }

    pub(crate) fn create_challenge(&self, challenge: &Challenge) -> Result<(), StoreError> {
        self.create(RecordKind::Challenge, &challenge.id, challenge)
    }

    /// Partial-update primitive: load the message, apply `apply`, rewrite the
    /// document, all under the write lock.
    pub(crate) fn with_message_mut<R>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Message) -> R,
    ) -> Result<R, StoreError> {
        let _guard = self.write_lock.lock().expect("store write lock");
        let mut message = self.get_message(id)?;
        let result = apply(&mut message);
        self.write(RecordKind::Message, id, &message)?;
        Ok(result)
    }

    pub(crate) fn with_challenge_mut<R>(
        &self,
        id: &str,
        apply: impl FnOnce(&mut Challenge) -> R,
    ) -> Result<R, StoreError> {
        let _guard = self.write_lock.lock().expect("store write lock");
        let mut challenge = self.get_challenge(id)?;
        let result = apply(&mut challenge);
        self.write(RecordKind::Challenge, id, &challenge)?;
        Ok(result)
    }

    fn load_all<R: serde::de::DeserializeOwned + RecordId>(
        &self,
        kind: RecordKind,
    ) -> Result<Vec<R>, StoreError> {
        let dir = self.root.join(kind.dir());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let contents = std::fs::read_to_string(&path)?;
            let mut record: R = toml::from_str(&contents).map_err(StoreError::Parse)?;
            record.set_id(id);
            records.push(record);
        }
        Ok(records)
    }

    fn load_one<R: serde::de::DeserializeOwned>(
        &self,
        kind: RecordKind,
        id: &str,
    ) -> Result<R, StoreError> {
        let path = self.record_path(kind, id)?;
        let contents = std::fs::read_to_string(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound | ErrorKind::IsADirectory => StoreError::NotFound,
            _ => StoreError::Io(err),
        })?;
        toml::from_str(&contents).map_err(StoreError::Parse)
    }

    fn create<R: Serialize>(&self, kind: RecordKind, id: &str, record: &R) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().expect("store write lock");
        let path = self.record_path(kind, id)?;
        match std::fs::symlink_metadata(&path) {
            Ok(_) => {
                return Err(StoreError::Io(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    "record already exists",
                )));
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        self.write(kind, id, record)
    }

    fn write<R: Serialize>(&self, kind: RecordKind, id: &str, record: &R) -> Result<(), StoreError> {
        let path = self.record_path(kind, id)?;
        let parent = path.parent().ok_or(StoreError::BadId)?;
        std::fs::create_dir_all(parent)?;
        let encoded = toml::to_string_pretty(record).map_err(StoreError::Encode)?;
        atomic_write(&path, &encoded)?;
        Ok(())
    }

    fn record_path(&self, kind: RecordKind, id: &str) -> Result<PathBuf, StoreError> {
        if !valid_record_id(id) {
            return Err(StoreError::BadId);
        }
        Ok(self.root.join(kind.dir()).join(format!("{id}.toml")))
    }
}

/// Ids land in filenames and media paths; anything that could escape the
/// record directory is rejected.
pub(crate) fn valid_record_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
        && !id.starts_with('.')
}

trait RecordId {
    fn set_id(&mut self, id: &str);
}

impl RecordId for Message {
    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }
}

impl RecordId for Challenge {
    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }
}

pub(crate) fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("missing parent directory"))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("record.toml");
    let pid = std::process::id();
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    for attempt in 0..10u32 {
        let temp_name = format!(".{}.tmp-{}-{}-{}", file_name, pid, nanos, attempt);
        let temp_path = parent.join(temp_name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
        {
            Ok(mut file) => {
                file.write_all(contents.as_bytes())?;
                file.flush()?;
                std::fs::rename(&temp_path, path)?;
                return Ok(());
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        "failed to create temp file",
    ))
}

#[cfg(test)]
#[allow(non_snake_case)]
pub(crate) mod tests {
    use super::*;
    use time::format_description::well_known::Rfc3339;
    use time::macros::date;

    pub(crate) fn create_temp_root(test_name: &str) -> PathBuf {
        let mut root = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        root.push(format!("daydrop-{}-{}", test_name, nanos));
        std::fs::create_dir_all(&root).expect("create temp dir");
        root
    }

    pub(crate) fn instant(raw: &str) -> OffsetDateTime {
        OffsetDateTime::parse(raw, &Rfc3339).expect("parse instant")
    }

    pub(crate) fn sample_message(date: Date, created_at: OffsetDateTime) -> Message {
        Message {
            id: record_id(RecordKind::Message, date, created_at),
            text: "Good morning!".to_string(),
            date,
            kind: MessageKind::Text,
            media_url: None,
            created_at,
            views: Vec::new(),
        }
    }

    pub(crate) fn sample_challenge(date: Date, created_at: OffsetDateTime) -> Challenge {
        Challenge {
            id: record_id(RecordKind::Challenge, date, created_at),
            prompt: "Take a photo of something blue today".to_string(),
            date,
            created_at,
            responses: BTreeMap::new(),
        }
    }

    #[test]
    fn record_id__should_combine_kind_date_and_timestamp() {
        // When
        let id = record_id(
            RecordKind::Message,
            date!(2025 - 05 - 14),
            instant("2025-05-10T12:00:00Z"),
        );

        // Then
        assert_eq!(id, "message_2025-05-14_1746878400");
    }

    #[test]
    fn create_message__should_write_a_toml_record() {
        // Given
        let root = create_temp_root("store-create");
        let store = ContentStore::new(root.clone());
        let message = sample_message(date!(2025 - 05 - 14), instant("2025-05-10T12:00:00Z"));

        // When
        store.create_message(&message).expect("create message");

        // Then
        let path = root.join("messages").join(format!("{}.toml", message.id));
        assert!(path.exists());
        let loaded = store.get_message(&message.id).expect("load message");
        assert_eq!(loaded.text, "Good morning!");
        assert_eq!(loaded.date, date!(2025 - 05 - 14));
        assert!(loaded.views.is_empty());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn create_message__should_refuse_to_overwrite() {
        // Given
        let root = create_temp_root("store-overwrite");
        let store = ContentStore::new(root.clone());
        let message = sample_message(date!(2025 - 05 - 14), instant("2025-05-10T12:00:00Z"));
        store.create_message(&message).expect("create message");

        // When
        let result = store.create_message(&message);

        // Then
        assert!(matches!(result, Err(StoreError::Io(_))));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn list_messages__should_sort_by_date_ascending() {
        // Given
        let root = create_temp_root("store-sort");
        let store = ContentStore::new(root.clone());
        let later = sample_message(date!(2025 - 06 - 02), instant("2025-05-10T12:00:00Z"));
        let earlier = sample_message(date!(2025 - 05 - 20), instant("2025-05-10T12:00:05Z"));
        store.create_message(&later).expect("create later");
        store.create_message(&earlier).expect("create earlier");

        // When
        let messages = store.list_messages().expect("list messages");

        // Then
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].date, date!(2025 - 05 - 20));
        assert_eq!(messages[1].date, date!(2025 - 06 - 02));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn list_messages__should_return_empty_for_missing_directory() {
        // Given
        let root = create_temp_root("store-empty");
        let store = ContentStore::new(root.clone());

        // Then
        assert!(store.list_messages().expect("list messages").is_empty());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn messages_on__should_filter_by_calendar_day() {
        // Given
        let root = create_temp_root("store-by-day");
        let store = ContentStore::new(root.clone());
        let first = sample_message(date!(2025 - 05 - 20), instant("2025-05-10T12:00:00Z"));
        let second = sample_message(date!(2025 - 05 - 20), instant("2025-05-10T12:00:05Z"));
        let other = sample_message(date!(2025 - 05 - 21), instant("2025-05-10T12:00:10Z"));
        store.create_message(&first).expect("create first");
        store.create_message(&second).expect("create second");
        store.create_message(&other).expect("create other");

        // When
        let on_day = store.messages_on(date!(2025 - 05 - 20)).expect("messages on");

        // Then
        assert_eq!(on_day.len(), 2);
        assert!(on_day.iter().all(|message| message.date == date!(2025 - 05 - 20)));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn get_message__should_report_missing_record() {
        // Given
        let root = create_temp_root("store-missing");
        let store = ContentStore::new(root.clone());

        // When
        let result = store.get_message("message_2025-05-14_0");

        // Then
        assert!(matches!(result, Err(StoreError::NotFound)));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn get_message__should_reject_path_escaping_ids() {
        // Given
        let root = create_temp_root("store-bad-id");
        let store = ContentStore::new(root.clone());

        // Then
        assert!(matches!(store.get_message("../outside"), Err(StoreError::BadId)));
        assert!(matches!(store.get_message(""), Err(StoreError::BadId)));
        assert!(matches!(store.get_message(".hidden"), Err(StoreError::BadId)));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn with_message_mut__should_persist_the_mutation() {
        // Given
        let root = create_temp_root("store-mutate");
        let store = ContentStore::new(root.clone());
        let message = sample_message(date!(2025 - 05 - 14), instant("2025-05-10T12:00:00Z"));
        store.create_message(&message).expect("create message");

        // When
        store
            .with_message_mut(&message.id, |message| {
                message.views.push(ViewEvent {
                    user_id: "u-mika".to_string(),
                    display_name: "Mika".to_string(),
                    email: "mika@example.com".to_string(),
                    timestamp: instant("2025-05-14T08:00:00Z"),
                });
            })
            .expect("append view");

        // Then
        let loaded = store.get_message(&message.id).expect("load message");
        assert_eq!(loaded.views.len(), 1);
        assert_eq!(loaded.views[0].user_id, "u-mika");

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn with_challenge_mut__should_keep_entries_for_other_users() {
        // Given
        let root = create_temp_root("store-responses");
        let store = ContentStore::new(root.clone());
        let challenge = sample_challenge(date!(2025 - 05 - 20), instant("2025-05-10T12:00:00Z"));
        store.create_challenge(&challenge).expect("create challenge");
        let entry = |name: &str| ResponseEntry {
            text: Some(format!("from {name}")),
            file_url: None,
            display_name: name.to_string(),
            photo_url: None,
            timestamp: instant("2025-05-20T08:00:00Z"),
        };

        // When: two users write their own entries in turn
        store
            .with_challenge_mut(&challenge.id, |challenge| {
                challenge.responses.insert("u-mika".to_string(), entry("Mika"));
            })
            .expect("first response");
        store
            .with_challenge_mut(&challenge.id, |challenge| {
                challenge.responses.insert("u-aki".to_string(), entry("Aki"));
            })
            .expect("second response");

        // Then
        let loaded = store.get_challenge(&challenge.id).expect("load challenge");
        assert_eq!(loaded.responses.len(), 2);
        assert!(loaded.responses.contains_key("u-mika"));
        assert!(loaded.responses.contains_key("u-aki"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn parse_day__should_round_trip_the_day_format() {
        // When
        let day = parse_day("2025-06-27").expect("parse day");

        // Then
        assert_eq!(day, date!(2025 - 06 - 27));
        assert_eq!(format_day(day), "2025-06-27");
        assert!(parse_day("27/06/2025").is_none());
    }
}
