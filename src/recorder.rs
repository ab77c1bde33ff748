use std::path::Path;

use time::Duration;

use crate::auth::Identity;
use crate::media::{self, MediaError};
use crate::ports::TimeProvider;
use crate::store::{ContentStore, RecordKind, ResponseEntry, StoreError, ViewEvent};

/// Repeated render effects can fire the same view call in quick succession;
/// calls by one user closer together than this collapse into a single logical
/// view. Events exactly this far apart (or further) are distinct.
pub(crate) const VIEW_DEDUP_WINDOW: Duration = Duration::seconds(60);

#[derive(Debug)]
pub(crate) enum RecordError {
    NotFound,
    Unauthenticated,
    Validation(&'static str),
    Store(StoreError),
    Upload(MediaError),
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::NotFound => f.write_str("record not found"),
            RecordError::Unauthenticated => f.write_str("not signed in"),
            RecordError::Validation(message) => f.write_str(message),
            RecordError::Store(err) => write!(f, "store failure: {err}"),
            RecordError::Upload(err) => write!(f, "upload failure: {err}"),
        }
    }
}

impl From<StoreError> for RecordError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => RecordError::NotFound,
            other => RecordError::Store(other),
        }
    }
}

/// Records that `viewer` has seen a message. Returns true when a new event was
/// appended, false when a recent view by the same user made the call a no-op.
/// The check and the append run inside the store's locked read-modify-write,
/// and the append is additive only.
pub(crate) fn record_view<T: TimeProvider>(
    store: &ContentStore,
    time: &T,
    message_id: &str,
    viewer: &Identity,
) -> Result<bool, RecordError> {
    let now = time.now();
    let appended = store.with_message_mut(message_id, |message| {
        let recent = message
            .views
            .iter()
            .any(|view| view.user_id == viewer.uid && now - view.timestamp < VIEW_DEDUP_WINDOW);
        if recent {
            return false;
        }
        message.views.push(ViewEvent {
            user_id: viewer.uid.clone(),
            display_name: viewer.display_name.clone(),
            email: viewer.email.clone(),
            timestamp: now,
        });
        true
    })?;
    Ok(appended)
}

pub(crate) struct DedupOutcome {
    pub(crate) kept: usize,
    pub(crate) removed: usize,
}

/// Retroactive cleanup for historical data written before the dedup window was
/// enforced: collapses the view sequence to the single most-recent event per
/// user. First-seen user order is preserved; running it again is a no-op.
pub(crate) fn deduplicate_views(
    store: &ContentStore,
    message_id: &str,
) -> Result<DedupOutcome, RecordError> {
    let outcome = store.with_message_mut(message_id, |message| {
        let before = message.views.len();
        let mut kept: Vec<ViewEvent> = Vec::new();
        for view in &message.views {
            match kept.iter_mut().find(|existing| existing.user_id == view.user_id) {
                Some(existing) => {
                    if view.timestamp > existing.timestamp {
                        *existing = view.clone();
                    }
                }
                None => kept.push(view.clone()),
            }
        }
        let after = kept.len();
        message.views = kept;
        DedupOutcome {
            kept: after,
            removed: before - after,
        }
    })?;
    Ok(outcome)
}

pub(crate) struct ResponseUpload {
    pub(crate) bytes: Vec<u8>,
    pub(crate) content_type: Option<String>,
    pub(crate) filename: Option<String>,
}

/// Stores a challenge response for `viewer`. The attached file (if any) is
/// uploaded first and its URL captured; an upload failure aborts the whole
/// operation with the challenge document untouched. Exactly one entry exists
/// per user; a second submission silently replaces the first.
pub(crate) fn record_response<T: TimeProvider>(
    store: &ContentStore,
    root: &Path,
    time: &T,
    challenge_id: &str,
    viewer: Option<&Identity>,
    text: Option<String>,
    upload: Option<ResponseUpload>,
) -> Result<(), RecordError> {
    let viewer = viewer.ok_or(RecordError::Unauthenticated)?;
    let text = text.filter(|text| !text.trim().is_empty());
    if text.is_none() && upload.is_none() {
        return Err(RecordError::Validation("response requires text or a file"));
    }

    // Existence check up front, so a missing challenge never costs an upload.
    store.get_challenge(challenge_id)?;

    let file_url = match upload {
        Some(upload) => {
            let stored = media::store_media(
                root,
                RecordKind::Challenge,
                challenge_id,
                Some(&viewer.uid),
                &upload.bytes,
                upload.content_type.as_deref(),
                upload.filename.as_deref(),
            )
            .map_err(RecordError::Upload)?;
            Some(stored.url)
        }
        None => None,
    };

    let entry = ResponseEntry {
        text,
        file_url,
        display_name: viewer.display_name.clone(),
        photo_url: viewer.photo_url.clone(),
        timestamp: time.now(),
    };
    store.with_challenge_mut(challenge_id, |challenge| {
        challenge.responses.insert(viewer.uid.clone(), entry);
    })?;
    Ok(())
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::store::tests::{create_temp_root, instant, sample_challenge, sample_message};
    use time::OffsetDateTime;
    use time::macros::date;

    #[derive(Clone)]
    struct FixedTime(OffsetDateTime);

    impl TimeProvider for FixedTime {
        fn now(&self) -> OffsetDateTime {
            self.0
        }
    }

    fn viewer(uid: &str, name: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            display_name: name.to_string(),
            email: format!("{name}@example.com"),
            photo_url: None,
        }
    }

    fn seeded_store(test_name: &str) -> (std::path::PathBuf, ContentStore, String, String) {
        let root = create_temp_root(test_name);
        let store = ContentStore::new(root.clone());
        let message = sample_message(date!(2025 - 05 - 20), instant("2025-05-10T12:00:00Z"));
        let challenge = sample_challenge(date!(2025 - 05 - 20), instant("2025-05-10T12:00:00Z"));
        store.create_message(&message).expect("create message");
        store.create_challenge(&challenge).expect("create challenge");
        (root, store, message.id, challenge.id)
    }

    #[test]
    fn record_view__should_append_the_first_view() {
        // Given
        let (root, store, message_id, _) = seeded_store("recorder-first-view");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));

        // When
        let appended =
            record_view(&store, &time, &message_id, &viewer("u-mika", "mika")).expect("record view");

        // Then
        assert!(appended);
        let message = store.get_message(&message_id).expect("load message");
        assert_eq!(message.views.len(), 1);
        assert_eq!(message.views[0].user_id, "u-mika");
        assert_eq!(message.views[0].email, "mika@example.com");
        assert_eq!(message.views[0].timestamp, instant("2025-05-20T08:00:00Z"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_view__should_collapse_calls_within_the_window() {
        // Given a view recorded 30 seconds ago
        let (root, store, message_id, _) = seeded_store("recorder-collapse");
        let mika = viewer("u-mika", "mika");
        let first = FixedTime(instant("2025-05-20T08:00:00Z"));
        record_view(&store, &first, &message_id, &mika).expect("first view");

        // When
        let second = FixedTime(instant("2025-05-20T08:00:30Z"));
        let appended = record_view(&store, &second, &message_id, &mika).expect("second view");

        // Then: no-op success, still one stored event
        assert!(!appended);
        let message = store.get_message(&message_id).expect("load message");
        assert_eq!(message.views.len(), 1);
        assert_eq!(message.views[0].timestamp, instant("2025-05-20T08:00:00Z"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_view__should_append_when_exactly_the_window_apart() {
        // Given
        let (root, store, message_id, _) = seeded_store("recorder-window-edge");
        let mika = viewer("u-mika", "mika");
        let first = FixedTime(instant("2025-05-20T08:00:00Z"));
        record_view(&store, &first, &message_id, &mika).expect("first view");

        // When: exactly 60 seconds later
        let second = FixedTime(instant("2025-05-20T08:01:00Z"));
        let appended = record_view(&store, &second, &message_id, &mika).expect("second view");

        // Then
        assert!(appended);
        let message = store.get_message(&message_id).expect("load message");
        assert_eq!(message.views.len(), 2);

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_view__should_not_collapse_other_users() {
        // Given
        let (root, store, message_id, _) = seeded_store("recorder-two-users");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));
        record_view(&store, &time, &message_id, &viewer("u-mika", "mika")).expect("mika view");

        // When: a different user views two seconds later
        let later = FixedTime(instant("2025-05-20T08:00:02Z"));
        let appended =
            record_view(&store, &later, &message_id, &viewer("u-aki", "aki")).expect("aki view");

        // Then
        assert!(appended);
        let message = store.get_message(&message_id).expect("load message");
        assert_eq!(message.views.len(), 2);

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_view__should_report_missing_message() {
        // Given
        let root = create_temp_root("recorder-missing");
        let store = ContentStore::new(root.clone());
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));

        // When
        let result = record_view(
            &store,
            &time,
            "message_2025-05-20_0",
            &viewer("u-mika", "mika"),
        );

        // Then
        assert!(matches!(result, Err(RecordError::NotFound)));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn deduplicate_views__should_keep_most_recent_per_user() {
        // Given views [A@t0, A@t0+30s, B@t0+10s]
        let (root, store, message_id, _) = seeded_store("recorder-dedup");
        store
            .with_message_mut(&message_id, |message| {
                for (uid, raw) in [
                    ("u-a", "2025-05-20T08:00:00Z"),
                    ("u-a", "2025-05-20T08:00:30Z"),
                    ("u-b", "2025-05-20T08:00:10Z"),
                ] {
                    message.views.push(ViewEvent {
                        user_id: uid.to_string(),
                        display_name: uid.to_string(),
                        email: format!("{uid}@example.com"),
                        timestamp: instant(raw),
                    });
                }
            })
            .expect("seed views");

        // When
        let outcome = deduplicate_views(&store, &message_id).expect("deduplicate");

        // Then: one entry per user, most recent retained, first-seen order
        assert_eq!(outcome.kept, 2);
        assert_eq!(outcome.removed, 1);
        let message = store.get_message(&message_id).expect("load message");
        assert_eq!(message.views.len(), 2);
        assert_eq!(message.views[0].user_id, "u-a");
        assert_eq!(message.views[0].timestamp, instant("2025-05-20T08:00:30Z"));
        assert_eq!(message.views[1].user_id, "u-b");
        assert_eq!(message.views[1].timestamp, instant("2025-05-20T08:00:10Z"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn deduplicate_views__should_be_idempotent() {
        // Given
        let (root, store, message_id, _) = seeded_store("recorder-dedup-twice");
        store
            .with_message_mut(&message_id, |message| {
                for raw in ["2025-05-20T08:00:00Z", "2025-05-20T08:00:30Z"] {
                    message.views.push(ViewEvent {
                        user_id: "u-a".to_string(),
                        display_name: "A".to_string(),
                        email: "a@example.com".to_string(),
                        timestamp: instant(raw),
                    });
                }
            })
            .expect("seed views");

        // When
        deduplicate_views(&store, &message_id).expect("first pass");
        let first = store.get_message(&message_id).expect("load message").views;
        let outcome = deduplicate_views(&store, &message_id).expect("second pass");
        let second = store.get_message(&message_id).expect("load message").views;

        // Then
        assert_eq!(outcome.removed, 0);
        assert_eq!(first.len(), second.len());
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].timestamp, instant("2025-05-20T08:00:30Z"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_response__should_require_a_signed_in_identity() {
        // Given
        let (root, store, _, challenge_id) = seeded_store("recorder-unauthenticated");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));

        // When
        let result = record_response(
            &store,
            &root,
            &time,
            &challenge_id,
            None,
            Some("hello".to_string()),
            None,
        );

        // Then
        assert!(matches!(result, Err(RecordError::Unauthenticated)));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_response__should_require_text_or_a_file() {
        // Given
        let (root, store, _, challenge_id) = seeded_store("recorder-empty-response");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));
        let mika = viewer("u-mika", "mika");

        // When
        let result = record_response(
            &store,
            &root,
            &time,
            &challenge_id,
            Some(&mika),
            Some("   ".to_string()),
            None,
        );

        // Then
        assert!(matches!(result, Err(RecordError::Validation(_))));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_response__should_overwrite_the_previous_entry() {
        // Given a first submission
        let (root, store, _, challenge_id) = seeded_store("recorder-overwrite");
        let mika = viewer("u-mika", "Mika");
        let first = FixedTime(instant("2025-05-20T08:00:00Z"));
        record_response(
            &store,
            &root,
            &first,
            &challenge_id,
            Some(&mika),
            Some("first answer".to_string()),
            None,
        )
        .expect("first response");

        // When
        let second = FixedTime(instant("2025-05-20T09:00:00Z"));
        record_response(
            &store,
            &root,
            &second,
            &challenge_id,
            Some(&mika),
            Some("second answer".to_string()),
            None,
        )
        .expect("second response");

        // Then: exactly one entry, carrying the second submission
        let challenge = store.get_challenge(&challenge_id).expect("load challenge");
        assert_eq!(challenge.responses.len(), 1);
        let entry = challenge.responses.get("u-mika").expect("entry");
        assert_eq!(entry.text.as_deref(), Some("second answer"));
        assert_eq!(entry.timestamp, instant("2025-05-20T09:00:00Z"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_response__should_store_the_uploaded_file_url() {
        // Given
        let (root, store, _, challenge_id) = seeded_store("recorder-file");
        let mika = viewer("u-mika", "Mika");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));
        let upload = ResponseUpload {
            bytes: vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
            content_type: Some("image/png".to_string()),
            filename: Some("blue.png".to_string()),
        };

        // When
        record_response(
            &store,
            &root,
            &time,
            &challenge_id,
            Some(&mika),
            None,
            Some(upload),
        )
        .expect("record response");

        // Then
        let challenge = store.get_challenge(&challenge_id).expect("load challenge");
        let entry = challenge.responses.get("u-mika").expect("entry");
        let url = entry.file_url.as_deref().expect("file url");
        assert!(url.starts_with(&format!("/media/challenges/{challenge_id}/u-mika/")));
        assert!(root.join(url.trim_start_matches('/')).exists());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_response__should_not_write_when_the_upload_fails() {
        // Given an upload the object store will reject
        let (root, store, _, challenge_id) = seeded_store("recorder-upload-failure");
        let mika = viewer("u-mika", "Mika");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));
        let upload = ResponseUpload {
            bytes: Vec::new(),
            content_type: None,
            filename: None,
        };

        // When
        let result = record_response(
            &store,
            &root,
            &time,
            &challenge_id,
            Some(&mika),
            Some("with file".to_string()),
            Some(upload),
        );

        // Then: the challenge document is untouched
        assert!(matches!(result, Err(RecordError::Upload(_))));
        let challenge = store.get_challenge(&challenge_id).expect("load challenge");
        assert!(challenge.responses.is_empty());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn record_response__should_report_missing_challenge_before_uploading() {
        // Given
        let root = create_temp_root("recorder-response-missing");
        let store = ContentStore::new(root.clone());
        let mika = viewer("u-mika", "Mika");
        let time = FixedTime(instant("2025-05-20T08:00:00Z"));
        let upload = ResponseUpload {
            bytes: vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
            content_type: Some("image/png".to_string()),
            filename: Some("blue.png".to_string()),
        };

        // When
        let result = record_response(
            &store,
            &root,
            &time,
            "challenge_2025-05-20_0",
            Some(&mika),
            None,
            Some(upload),
        );

        // Then: no orphaned file either
        assert!(matches!(result, Err(RecordError::NotFound)));
        assert!(!root.join("media").exists());

        std::fs::remove_dir_all(&root).expect("cleanup");
    }
}
