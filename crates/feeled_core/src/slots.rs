//! crates/feeled_core/src/slots.rs
//!
//! Typed accessors over the [`KeyValueStore`] port, one per logical persisted
//! slot. The key layout and the JSON shape of every slot live here so the
//! orchestrator never touches raw keys.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AvatarCustomization, Caller, HistoryItem, LessonFormData};
use crate::ports::{KeyValueStore, PortError, PortResult};

const PENDING_KEY_PREFIX: &str = "feeled_generation_session";
const HISTORY_KEY_PREFIX: &str = "feeled_lesson_history_";
const COUNTER_KEY_PREFIX: &str = "feeled_lesson_count";
const AVATAR_KEY_PREFIX: &str = "feeled_avatar_customization";
const CREDENTIAL_KEY_PREFIX: &str = "feeled_api_key_selected";
const AUDIO_KEY_PREFIX: &str = "feeled_lesson_audio";

/// The resumable-session snapshot: the form data of an in-flight request.
/// Kept as a wrapper object so the persisted JSON stays the
/// `{"formData": …}` shape clients already store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingGeneration {
    pub form_data: LessonFormData,
}

/// The anonymous freemium counter plus the activity stamp that drives the
/// inactivity reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnonCounter {
    pub count: u32,
    pub last_activity_ms: i64,
}

/// Typed slot accessors shared by the pipeline and the web layer.
#[derive(Clone)]
pub struct Slots {
    store: Arc<dyn KeyValueStore>,
}

impl Slots {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn pending_key(caller: &Caller) -> String {
        format!("{PENDING_KEY_PREFIX}:{}", caller.storage_key())
    }

    fn history_key(user_id: Uuid) -> String {
        format!("{HISTORY_KEY_PREFIX}{user_id}")
    }

    fn counter_key(client: &str) -> String {
        format!("{COUNTER_KEY_PREFIX}:anon:{client}")
    }

    fn avatar_key(caller: &Caller) -> String {
        format!("{AVATAR_KEY_PREFIX}:{}", caller.storage_key())
    }

    fn credential_key(caller: &Caller) -> String {
        format!("{CREDENTIAL_KEY_PREFIX}:{}", caller.storage_key())
    }

    fn audio_key(lesson_id: i64) -> String {
        format!("{AUDIO_KEY_PREFIX}:{lesson_id}")
    }

    async fn load_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> PortResult<Option<T>> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| PortError::Storage(format!("corrupt slot '{key}': {e}"))),
        }
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> PortResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| PortError::Storage(format!("cannot serialize slot '{key}': {e}")))?;
        self.store.put(key, &raw).await
    }

    // --- Resumable generation request ---

    pub async fn load_pending(&self, caller: &Caller) -> PortResult<Option<PendingGeneration>> {
        self.load_json(&Self::pending_key(caller)).await
    }

    pub async fn save_pending(&self, caller: &Caller, form: &LessonFormData) -> PortResult<()> {
        let pending = PendingGeneration {
            form_data: form.clone(),
        };
        self.save_json(&Self::pending_key(caller), &pending).await
    }

    pub async fn clear_pending(&self, caller: &Caller) -> PortResult<()> {
        self.store.delete(&Self::pending_key(caller)).await
    }

    // --- Lesson history (authenticated users only) ---

    pub async fn load_history(&self, user_id: Uuid) -> PortResult<Vec<HistoryItem>> {
        Ok(self
            .load_json(&Self::history_key(user_id))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_history(&self, user_id: Uuid, items: &[HistoryItem]) -> PortResult<()> {
        self.save_json(&Self::history_key(user_id), &items).await
    }

    pub async fn clear_history(&self, user_id: Uuid) -> PortResult<()> {
        self.store.delete(&Self::history_key(user_id)).await
    }

    // --- Anonymous lesson counter ---

    pub async fn load_counter(&self, client: &str) -> PortResult<AnonCounter> {
        Ok(self
            .load_json(&Self::counter_key(client))
            .await?
            .unwrap_or_default())
    }

    pub async fn save_counter(&self, client: &str, counter: AnonCounter) -> PortResult<()> {
        self.save_json(&Self::counter_key(client), &counter).await
    }

    pub async fn clear_counter(&self, client: &str) -> PortResult<()> {
        self.store.delete(&Self::counter_key(client)).await
    }

    // --- Avatar customization ---

    pub async fn load_avatar(&self, caller: &Caller) -> PortResult<Option<AvatarCustomization>> {
        self.load_json(&Self::avatar_key(caller)).await
    }

    pub async fn save_avatar(
        &self,
        caller: &Caller,
        avatar: &AvatarCustomization,
    ) -> PortResult<()> {
        self.save_json(&Self::avatar_key(caller), avatar).await
    }

    // --- Credential-selected flag ---

    pub async fn credential_selected(&self, caller: &Caller) -> PortResult<bool> {
        Ok(self
            .load_json(&Self::credential_key(caller))
            .await?
            .unwrap_or(false))
    }

    pub async fn mark_credential_selected(&self, caller: &Caller) -> PortResult<()> {
        self.save_json(&Self::credential_key(caller), &true).await
    }

    pub async fn clear_credential_selected(&self, caller: &Caller) -> PortResult<()> {
        self.store.delete(&Self::credential_key(caller)).await
    }

    // --- Narrated-audio blobs ---

    pub async fn save_audio(&self, lesson_id: i64, wav: &[u8]) -> PortResult<()> {
        use base64::Engine as _;
        let encoded = base64::engine::general_purpose::STANDARD.encode(wav);
        self.store.put(&Self::audio_key(lesson_id), &encoded).await
    }

    pub async fn load_audio(&self, lesson_id: i64) -> PortResult<Option<Vec<u8>>> {
        use base64::Engine as _;
        match self.store.get(&Self::audio_key(lesson_id)).await? {
            None => Ok(None),
            Some(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded.as_bytes())
                .map(Some)
                .map_err(|e| PortError::Storage(format!("corrupt audio blob: {e}"))),
        }
    }
}

//=========================================================================================
// In-Memory Store
//=========================================================================================

/// A `HashMap`-backed store for tests and local experiments.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> PortResult<()> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> PortResult<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Slots {
        Slots::new(Arc::new(MemoryStore::new()))
    }

    fn sample_form() -> LessonFormData {
        LessonFormData {
            concept: "Fractions".into(),
            grade: "5".into(),
            language: "English".into(),
            tone: "Encouraging".into(),
            voice: "alloy".into(),
        }
    }

    #[tokio::test]
    async fn pending_slot_round_trips_and_clears() {
        let slots = slots();
        let caller = Caller::Anonymous("browser-1".into());

        assert!(slots.load_pending(&caller).await.unwrap().is_none());

        slots.save_pending(&caller, &sample_form()).await.unwrap();
        let pending = slots.load_pending(&caller).await.unwrap().unwrap();
        assert_eq!(pending.form_data.concept, "Fractions");

        slots.clear_pending(&caller).await.unwrap();
        assert!(slots.load_pending(&caller).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counter_defaults_to_zero_per_client() {
        let slots = slots();

        let counter = slots.load_counter("browser-1").await.unwrap();
        assert_eq!(counter, AnonCounter::default());

        slots
            .save_counter(
                "browser-1",
                AnonCounter {
                    count: 3,
                    last_activity_ms: 42,
                },
            )
            .await
            .unwrap();

        assert_eq!(slots.load_counter("browser-1").await.unwrap().count, 3);
        // Another browser's counter is untouched.
        assert_eq!(slots.load_counter("browser-2").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn corrupt_slot_surfaces_a_storage_error() {
        let store = Arc::new(MemoryStore::new());
        let slots = Slots::new(store.clone());
        let caller = Caller::Anonymous("browser-1".into());

        store
            .put("feeled_generation_session:anon:browser-1", "{not json")
            .await
            .unwrap();

        assert!(matches!(
            slots.load_pending(&caller).await,
            Err(PortError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn audio_blob_round_trips() {
        let slots = slots();
        let wav = vec![0x52, 0x49, 0x46, 0x46, 0x00, 0x01];

        slots.save_audio(1700000000000, &wav).await.unwrap();
        assert_eq!(
            slots.load_audio(1700000000000).await.unwrap().unwrap(),
            wav
        );
        assert!(slots.load_audio(1).await.unwrap().is_none());
    }
}
