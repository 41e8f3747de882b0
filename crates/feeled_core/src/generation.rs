//! crates/feeled_core/src/generation.rs
//!
//! The lesson-generation orchestrator. Drives the two sequential phases
//! (script, then audio), applies the freemium gate for anonymous callers,
//! keeps the resumable-session slot current, and records completed lessons
//! into the caller's history.

use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audio::{pcm16_to_wav, TTS_SAMPLE_RATE};
use crate::domain::{Caller, Feedback, GeneratedContent, HistoryItem, LessonFormData};
use crate::ports::{
    AudioSynthesisService, Clock, ImageSynthesisService, Notifier, NoticeKind, PortError,
    ScriptGenerationService,
};
use crate::slots::{AnonCounter, Slots};

/// Anonymous callers get this many lessons before the gate closes.
pub const DEFAULT_FREE_LESSON_LIMIT: u32 = 5;

/// Anonymous counters reset after this much inactivity.
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: i64 = 30 * 60 * 1000;

const LESSON_READY_NOTICE: &str = "Lesson ready! Email notification sent.";
const ONE_LESSON_LEFT_NOTICE: &str = "You have 1 free lesson remaining.";
const SESSION_RESET_NOTICE: &str = "Session reset. Your free lessons are restored.";
const FEEDBACK_THANKS_NOTICE: &str = "Thank you for your feedback!";

//=========================================================================================
// Generation State Machine
//=========================================================================================

/// The explicit phase state of the pipeline, so UI and tests can assert on
/// state rather than on loading-message prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    GeneratingScript,
    GeneratingAudio,
    Succeeded,
    Failed,
}

impl GenerationState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: GenerationState) -> bool {
        use GenerationState::*;
        matches!(
            (self, next),
            (Idle, GeneratingScript)
                | (Succeeded, GeneratingScript)
                | (Failed, GeneratingScript)
                | (GeneratingScript, GeneratingAudio)
                | (GeneratingScript, Failed)
                | (GeneratingAudio, Succeeded)
                | (GeneratingAudio, Failed)
        )
    }
}

//=========================================================================================
// Errors
//=========================================================================================

/// The failure taxonomy of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("All lesson fields are required.")]
    IncompleteForm,
    /// Raised before any network activity; the UI answers with an upgrade path.
    #[error("You have used all your free lessons.")]
    QuotaExceeded,
    /// Phase 1 returned no script or an empty scene sequence.
    #[error("Failed to generate a valid lesson script.")]
    InvalidScript,
    /// A downstream failure, message passed through verbatim.
    #[error("{0}")]
    Upstream(String),
    #[error("Lesson not found.")]
    NotFound,
}

impl GenerationError {
    /// Best-effort detection of an invalid upstream credential. Substring
    /// matching is fragile, but it is the contract the providers give us.
    pub fn is_credential_invalid(&self) -> bool {
        matches!(self, Self::Upstream(message) if message.to_lowercase().contains("api key"))
    }

    /// The message shown to the end user. Phase failures get a static prefix;
    /// credential errors pass through directly so the UI re-prompts for a key.
    pub fn user_message(&self) -> String {
        match self {
            Self::Upstream(message) if self.is_credential_invalid() => message.clone(),
            Self::IncompleteForm | Self::QuotaExceeded | Self::NotFound => self.to_string(),
            other => format!("Generation failed: {other}"),
        }
    }
}

impl From<PortError> for GenerationError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(_) => Self::NotFound,
            other => Self::Upstream(other.to_string()),
        }
    }
}

//=========================================================================================
// The Pipeline
//=========================================================================================

pub struct LessonPipeline {
    script: Arc<dyn ScriptGenerationService>,
    audio: Arc<dyn AudioSynthesisService>,
    image: Arc<dyn ImageSynthesisService>,
    slots: Slots,
    clock: Arc<dyn Clock>,
    free_lesson_limit: u32,
    inactivity_timeout_ms: i64,
    state: Mutex<GenerationState>,
}

impl LessonPipeline {
    pub fn new(
        script: Arc<dyn ScriptGenerationService>,
        audio: Arc<dyn AudioSynthesisService>,
        image: Arc<dyn ImageSynthesisService>,
        slots: Slots,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            script,
            audio,
            image,
            slots,
            clock,
            free_lesson_limit: DEFAULT_FREE_LESSON_LIMIT,
            inactivity_timeout_ms: DEFAULT_INACTIVITY_TIMEOUT_MS,
            state: Mutex::new(GenerationState::Idle),
        }
    }

    /// Overrides the freemium quota and the inactivity window.
    pub fn with_limits(mut self, free_lesson_limit: u32, inactivity_timeout_ms: i64) -> Self {
        self.free_lesson_limit = free_lesson_limit;
        self.inactivity_timeout_ms = inactivity_timeout_ms;
        self
    }

    pub fn slots(&self) -> &Slots {
        &self.slots
    }

    pub fn state(&self) -> GenerationState {
        *self.state.lock().unwrap()
    }

    fn transition(&self, next: GenerationState) {
        let mut state = self.state.lock().unwrap();
        if !state.can_transition_to(next) {
            warn!("illegal generation state transition {:?} -> {:?}", *state, next);
        }
        *state = next;
    }

    /// Runs the full two-phase generation for one lesson request.
    ///
    /// Phases execute strictly sequentially; nothing is cancellable once
    /// started, and neither phase retries internally.
    pub async fn generate(
        &self,
        caller: &Caller,
        form: &LessonFormData,
        notifier: &dyn Notifier,
    ) -> Result<HistoryItem, GenerationError> {
        if !form.is_complete() {
            return Err(GenerationError::IncompleteForm);
        }

        // Pre-flight freemium gate: rejected requests must not reach the
        // network and must not touch the stored counter.
        if let Caller::Anonymous(client) = caller {
            self.reset_if_inactive(client, notifier).await;
            let counter = self.load_counter_lenient(client).await;
            if counter.count >= self.free_lesson_limit {
                return Err(GenerationError::QuotaExceeded);
            }
        }

        // Snapshot the request so an interrupted session can be replayed.
        if let Err(e) = self.slots.save_pending(caller, form).await {
            warn!("could not persist the resumable-session slot: {e}");
        }

        self.transition(GenerationState::GeneratingScript);
        info!(concept = %form.concept, "Phase 1/2: crafting the lesson script");
        let script = match self.script.generate_script(form).await {
            Ok(script) => script,
            Err(e) => {
                return Err(self
                    .finish_failure(caller, GenerationError::Upstream(e.to_string()))
                    .await)
            }
        };
        if script.scenes.is_empty() {
            return Err(self
                .finish_failure(caller, GenerationError::InvalidScript)
                .await);
        }

        self.transition(GenerationState::GeneratingAudio);
        info!("Phase 2/2: generating the audio lesson");
        let narration: String = script
            .scenes
            .iter()
            .map(|scene| scene.narration.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let pcm = match self.audio.synthesize(&narration, &form.voice).await {
            Ok(pcm) => pcm,
            Err(e) => {
                return Err(self
                    .finish_failure(caller, GenerationError::Upstream(e.to_string()))
                    .await)
            }
        };
        let wav = match pcm16_to_wav(&pcm, TTS_SAMPLE_RATE) {
            Ok(wav) => wav,
            Err(e) => {
                return Err(self
                    .finish_failure(
                        caller,
                        GenerationError::Upstream(format!(
                            "Failed to prepare the lesson audio: {e}"
                        )),
                    )
                    .await)
            }
        };

        let id = self.clock.now_millis();
        if let Err(e) = self.slots.save_audio(id, &wav).await {
            return Err(self
                .finish_failure(
                    caller,
                    GenerationError::Upstream(format!("Failed to store the lesson audio: {e}")),
                )
                .await);
        }

        let avatar = match self.slots.load_avatar(caller).await {
            Ok(avatar) => avatar,
            Err(e) => {
                warn!("could not load the avatar snapshot: {e}");
                None
            }
        };

        let item = HistoryItem {
            id,
            timestamp: id,
            content: GeneratedContent {
                audio_url: format!("/lessons/audio/{id}.wav"),
                quiz: script.quiz,
                summary: script.summary,
                title: script.title,
                scenes: script.scenes,
                voice: form.voice.clone(),
                avatar_customization: avatar,
            },
            feedback: None,
        };

        if let Err(e) = self.slots.clear_pending(caller).await {
            warn!("could not clear the resumable-session slot: {e}");
        }
        notifier.notify(NoticeKind::Success, LESSON_READY_NOTICE);

        match caller {
            Caller::User(user_id) => match self.slots.load_history(*user_id).await {
                Ok(mut history) => {
                    history.insert(0, item.clone());
                    if let Err(e) = self.slots.save_history(*user_id, &history).await {
                        error!("could not persist the lesson history: {e}");
                    }
                }
                Err(e) => error!("could not load the lesson history: {e}"),
            },
            Caller::Anonymous(client) => {
                let mut counter = self.load_counter_lenient(client).await;
                counter.count += 1;
                counter.last_activity_ms = self.clock.now_millis();
                if counter.count == self.free_lesson_limit.saturating_sub(1) {
                    notifier.notify(NoticeKind::Info, ONE_LESSON_LEFT_NOTICE);
                }
                if let Err(e) = self.slots.save_counter(client, counter).await {
                    error!("could not persist the anonymous lesson counter: {e}");
                }
            }
        }

        self.transition(GenerationState::Succeeded);
        Ok(item)
    }

    /// Replays a stored in-flight request once, if one exists.
    ///
    /// Malformed payloads (no concept) are discarded without a call. A
    /// replay goes through `generate`, so the quota gate applies at that
    /// top-level call like any other request.
    pub async fn resume(
        &self,
        caller: &Caller,
        notifier: &dyn Notifier,
    ) -> Result<Option<HistoryItem>, GenerationError> {
        let pending = match self.slots.load_pending(caller).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("discarding an unreadable resumable-session slot: {e}");
                let _ = self.slots.clear_pending(caller).await;
                return Ok(None);
            }
        };
        let Some(pending) = pending else {
            return Ok(None);
        };
        if pending.form_data.concept.trim().is_empty() {
            let _ = self.slots.clear_pending(caller).await;
            return Ok(None);
        }

        info!("resuming an interrupted lesson generation");
        match self.generate(caller, &pending.form_data, notifier).await {
            Ok(item) => Ok(Some(item)),
            // A snapshot that can never generate is dropped, not replayed forever.
            Err(GenerationError::IncompleteForm) => {
                let _ = self.slots.clear_pending(caller).await;
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    /// Stamps anonymous activity and applies the inactivity reset if due.
    pub async fn touch_activity(&self, caller: &Caller, notifier: &dyn Notifier) {
        let Caller::Anonymous(client) = caller else {
            return;
        };
        self.reset_if_inactive(client, notifier).await;
        let mut counter = self.load_counter_lenient(client).await;
        counter.last_activity_ms = self.clock.now_millis();
        if let Err(e) = self.slots.save_counter(client, counter).await {
            warn!("could not stamp anonymous activity: {e}");
        }
    }

    async fn reset_if_inactive(&self, client: &str, notifier: &dyn Notifier) {
        let counter = match self.slots.load_counter(client).await {
            Ok(counter) => counter,
            Err(e) => {
                warn!("could not read the anonymous lesson counter: {e}");
                return;
            }
        };
        if counter.count == 0 || counter.last_activity_ms == 0 {
            return;
        }
        let now = self.clock.now_millis();
        if now - counter.last_activity_ms < self.inactivity_timeout_ms {
            return;
        }
        let reset = AnonCounter {
            count: 0,
            last_activity_ms: now,
        };
        if let Err(e) = self.slots.save_counter(client, reset).await {
            warn!("could not reset the anonymous lesson counter: {e}");
            return;
        }
        notifier.notify(NoticeKind::Info, SESSION_RESET_NOTICE);
    }

    async fn load_counter_lenient(&self, client: &str) -> AnonCounter {
        match self.slots.load_counter(client).await {
            Ok(counter) => counter,
            Err(e) => {
                warn!("could not read the anonymous lesson counter: {e}");
                AnonCounter::default()
            }
        }
    }

    async fn finish_failure(&self, caller: &Caller, err: GenerationError) -> GenerationError {
        // The slot is cleared on failure too, so a failed request is not
        // replayed on the next load.
        if let Err(e) = self.slots.clear_pending(caller).await {
            warn!("could not clear the resumable-session slot: {e}");
        }
        if err.is_credential_invalid() {
            if let Err(e) = self.slots.clear_credential_selected(caller).await {
                warn!("could not clear the credential-selected flag: {e}");
            }
        }
        self.transition(GenerationState::Failed);
        error!("lesson generation failed: {err}");
        err
    }

    //-------------------------------------------------------------------------------------
    // Post-creation mutation paths
    //-------------------------------------------------------------------------------------

    /// Generates an illustration for an arbitrary prompt without persisting
    /// anything. Anonymous callers patch their in-memory copy client-side.
    pub async fn generate_scene_image(&self, prompt: &str) -> Result<String, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::Upstream(
                "Missing 'prompt' in request. Please provide a visual description.".into(),
            ));
        }
        Ok(self.image.generate_image(prompt).await?)
    }

    /// Generates an illustration for a stored lesson's scene and patches the
    /// scene's image URL in place (scenes are looked up by scene number).
    pub async fn attach_scene_image(
        &self,
        user_id: Uuid,
        lesson_id: i64,
        scene_number: u32,
    ) -> Result<String, GenerationError> {
        let mut history = self.slots.load_history(user_id).await?;
        let item = history
            .iter_mut()
            .find(|item| item.id == lesson_id)
            .ok_or(GenerationError::NotFound)?;
        let scene = item
            .content
            .scenes
            .iter_mut()
            .find(|scene| scene.scene_number == scene_number)
            .ok_or(GenerationError::NotFound)?;

        let image_url = self.image.generate_image(&scene.visual_description).await?;
        scene.image_url = Some(image_url.clone());
        self.slots.save_history(user_id, &history).await?;
        Ok(image_url)
    }

    /// Records a feedback vote on a stored lesson.
    pub async fn submit_feedback(
        &self,
        user_id: Uuid,
        lesson_id: i64,
        vote: Feedback,
        notifier: &dyn Notifier,
    ) -> Result<(), GenerationError> {
        let mut history = self.slots.load_history(user_id).await?;
        let item = history
            .iter_mut()
            .find(|item| item.id == lesson_id)
            .ok_or(GenerationError::NotFound)?;
        item.feedback = Some(vote);
        self.slots.save_history(user_id, &history).await?;
        notifier.notify(NoticeKind::Info, FEEDBACK_THANKS_NOTICE);
        Ok(())
    }

    //-------------------------------------------------------------------------------------
    // History surface
    //-------------------------------------------------------------------------------------

    pub async fn list_history(&self, user_id: Uuid) -> Result<Vec<HistoryItem>, GenerationError> {
        Ok(self.slots.load_history(user_id).await?)
    }

    pub async fn delete_history_item(
        &self,
        user_id: Uuid,
        lesson_id: i64,
    ) -> Result<(), GenerationError> {
        let mut history = self.slots.load_history(user_id).await?;
        let before = history.len();
        history.retain(|item| item.id != lesson_id);
        if history.len() == before {
            return Err(GenerationError::NotFound);
        }
        self.slots.save_history(user_id, &history).await?;
        Ok(())
    }

    pub async fn clear_history(&self, user_id: Uuid) -> Result<(), GenerationError> {
        Ok(self.slots.clear_history(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LessonScript, Quiz, QuizOption, Scene};
    use crate::ports::{Notice, PortResult};
    use crate::slots::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    fn sample_form() -> LessonFormData {
        LessonFormData {
            concept: "Photosynthesis".into(),
            grade: "4".into(),
            language: "English".into(),
            tone: "Playful".into(),
            voice: "nova".into(),
        }
    }

    fn sample_script() -> LessonScript {
        LessonScript {
            title: "How Plants Eat Sunlight".into(),
            story: "Fern the plant wakes up hungry.".into(),
            scenes: vec![
                Scene {
                    scene_number: 1,
                    narration: "Meet Fern the plant.".into(),
                    visual_description: "A smiling fern on a windowsill.".into(),
                    text_overlay: None,
                    image_url: None,
                },
                Scene {
                    scene_number: 2,
                    narration: "Fern drinks sunlight for breakfast.".into(),
                    visual_description: "Sunbeams pouring onto leaves.".into(),
                    text_overlay: Some("photosynthesis".into()),
                    image_url: None,
                },
            ],
            quiz: Quiz {
                question: "What do plants use to make food?".into(),
                options: vec![
                    QuizOption {
                        text: "Sunlight".into(),
                        is_correct: true,
                        feedback: "Right!".into(),
                    },
                    QuizOption {
                        text: "Moonlight".into(),
                        is_correct: false,
                        feedback: "Not quite.".into(),
                    },
                ],
            },
            summary: "Plants turn light into food.".into(),
        }
    }

    #[derive(Default)]
    struct ScriptStub {
        calls: AtomicUsize,
        fail_with: Option<String>,
        empty_scenes: bool,
    }

    #[async_trait]
    impl ScriptGenerationService for ScriptStub {
        async fn generate_script(&self, _form: &LessonFormData) -> PortResult<LessonScript> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_with {
                return Err(PortError::Upstream(message.clone()));
            }
            let mut script = sample_script();
            if self.empty_scenes {
                script.scenes.clear();
            }
            Ok(script)
        }
    }

    #[derive(Default)]
    struct AudioStub {
        calls: AtomicUsize,
        last_request: Mutex<Option<(String, String)>>,
    }

    #[async_trait]
    impl AudioSynthesisService for AudioStub {
        async fn synthesize(&self, text: &str, voice: &str) -> PortResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some((text.to_string(), voice.to_string()));
            Ok(vec![0u8; 4800])
        }
    }

    #[derive(Default)]
    struct ImageStub;

    #[async_trait]
    impl ImageSynthesisService for ImageStub {
        async fn generate_image(&self, _prompt: &str) -> PortResult<String> {
            Ok("data:image/png;base64,QUJD".into())
        }
    }

    /// A clock that ticks forward one millisecond per observation.
    struct StepClock(AtomicI64);

    impl StepClock {
        fn starting_at(ms: i64) -> Self {
            Self(AtomicI64::new(ms))
        }

        fn jump_to(&self, ms: i64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for StepClock {
        fn now_millis(&self) -> i64 {
            self.0.fetch_add(1, Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        notices: Mutex<Vec<Notice>>,
    }

    impl RecordingNotifier {
        fn messages(&self) -> Vec<String> {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .map(|n| n.message.clone())
                .collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, kind: NoticeKind, message: &str) {
            self.notices.lock().unwrap().push(Notice {
                kind,
                message: message.to_string(),
            });
        }
    }

    struct Harness {
        pipeline: LessonPipeline,
        script: Arc<ScriptStub>,
        audio: Arc<AudioStub>,
        clock: Arc<StepClock>,
        slots: Slots,
    }

    fn harness_with(script: ScriptStub) -> Harness {
        let script = Arc::new(script);
        let audio = Arc::new(AudioStub::default());
        let clock = Arc::new(StepClock::starting_at(1_700_000_000_000));
        let slots = Slots::new(Arc::new(MemoryStore::new()));
        let pipeline = LessonPipeline::new(
            script.clone(),
            audio.clone(),
            Arc::new(ImageStub),
            slots.clone(),
            clock.clone(),
        );
        Harness {
            pipeline,
            script,
            audio,
            clock,
            slots,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptStub::default())
    }

    #[tokio::test]
    async fn successful_generation_builds_a_complete_history_item() {
        let h = harness();
        let user = Uuid::new_v4();
        let caller = Caller::User(user);
        let notifier = RecordingNotifier::default();

        let item = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();

        assert_eq!(item.content.scenes.len(), sample_script().scenes.len());
        assert_eq!(item.timestamp, item.id);
        assert_eq!(item.content.audio_url, format!("/lessons/audio/{}.wav", item.id));
        assert_eq!(item.content.voice, "nova");
        assert_eq!(h.pipeline.state(), GenerationState::Succeeded);

        // The lesson landed at the head of the persisted history.
        let history = h.slots.load_history(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, item.id);

        // The resumable slot is gone and the audio blob is playable.
        assert!(h.slots.load_pending(&caller).await.unwrap().is_none());
        let wav = h.slots.load_audio(item.id).await.unwrap().unwrap();
        assert_eq!(&wav[0..4], b"RIFF");

        assert!(notifier.messages().iter().any(|m| m.contains("Lesson ready")));
    }

    #[tokio::test]
    async fn lesson_ids_are_unique_within_a_run() {
        let h = harness();
        let user = Uuid::new_v4();
        let caller = Caller::User(user);
        let notifier = RecordingNotifier::default();

        let first = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();
        let second = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();

        assert_ne!(first.id, second.id);

        // Newest lesson first.
        let history = h.slots.load_history(user).await.unwrap();
        assert_eq!(history[0].id, second.id);
        assert_eq!(history[1].id, first.id);
    }

    #[tokio::test]
    async fn narration_is_joined_in_scene_order_with_paragraph_breaks() {
        let h = harness();
        let notifier = RecordingNotifier::default();

        h.pipeline
            .generate(&Caller::Anonymous("b1".into()), &sample_form(), &notifier)
            .await
            .unwrap();

        let (text, voice) = h.audio.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(
            text,
            "Meet Fern the plant.\n\nFern drinks sunlight for breakfast."
        );
        assert_eq!(voice, "nova");
    }

    #[tokio::test]
    async fn anonymous_generation_counts_lessons_and_warns_near_the_limit() {
        let h = harness();
        let caller = Caller::Anonymous("b1".into());

        for expected in 1..=4u32 {
            let notifier = RecordingNotifier::default();
            h.pipeline
                .generate(&caller, &sample_form(), &notifier)
                .await
                .unwrap();
            let counter = h.slots.load_counter("b1").await.unwrap();
            assert_eq!(counter.count, expected);

            let warnings = notifier
                .messages()
                .iter()
                .filter(|m| m.contains("1 free lesson remaining"))
                .count();
            assert_eq!(warnings, usize::from(expected == 4));
        }

        // Anonymous lessons never touch a history list.
        let history_keys = h.slots.load_history(Uuid::nil()).await.unwrap();
        assert!(history_keys.is_empty());
    }

    #[tokio::test]
    async fn sixth_anonymous_call_is_rejected_before_any_network_activity() {
        let h = harness();
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        h.slots
            .save_counter(
                "b1",
                AnonCounter {
                    count: 5,
                    last_activity_ms: 1_700_000_000_000,
                },
            )
            .await
            .unwrap();

        let err = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::QuotaExceeded);
        assert_eq!(h.script.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.audio.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.slots.load_counter("b1").await.unwrap().count, 5);
        // No resumable snapshot is written for a gated request.
        assert!(h.slots.load_pending(&caller).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_scene_sequence_is_an_invalid_script_hard_failure() {
        let h = harness_with(ScriptStub {
            empty_scenes: true,
            ..Default::default()
        });
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        let err = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::InvalidScript);
        assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);
        // Phase 2 never starts; the slot is cleared on the failure path.
        assert_eq!(h.audio.calls.load(Ordering::SeqCst), 0);
        assert!(h.slots.load_pending(&caller).await.unwrap().is_none());
        assert_eq!(h.pipeline.state(), GenerationState::Failed);
        assert_eq!(
            err.user_message(),
            "Generation failed: Failed to generate a valid lesson script."
        );
    }

    #[tokio::test]
    async fn api_key_errors_clear_the_credential_selected_flag() {
        let h = harness_with(ScriptStub {
            fail_with: Some("The provided API Key is invalid or not found.".into()),
            ..Default::default()
        });
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        h.slots.mark_credential_selected(&caller).await.unwrap();

        let err = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap_err();

        assert!(err.is_credential_invalid());
        // Credential errors pass through without the generic prefix.
        assert_eq!(
            err.user_message(),
            "The provided API Key is invalid or not found."
        );
        assert!(!h.slots.credential_selected(&caller).await.unwrap());
    }

    #[tokio::test]
    async fn ordinary_upstream_errors_keep_the_credential_flag() {
        let h = harness_with(ScriptStub {
            fail_with: Some("The model is temporarily overloaded.".into()),
            ..Default::default()
        });
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        h.slots.mark_credential_selected(&caller).await.unwrap();

        let err = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap_err();

        assert!(!err.is_credential_invalid());
        assert_eq!(
            err.user_message(),
            "Generation failed: The model is temporarily overloaded."
        );
        assert!(h.slots.credential_selected(&caller).await.unwrap());
    }

    #[tokio::test]
    async fn thirty_minutes_of_inactivity_resets_the_counter_exactly_once() {
        let h = harness();
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        h.slots
            .save_counter(
                "b1",
                AnonCounter {
                    count: 3,
                    last_activity_ms: 1_700_000_000_000,
                },
            )
            .await
            .unwrap();

        h.clock.jump_to(1_700_000_000_000 + DEFAULT_INACTIVITY_TIMEOUT_MS);
        h.pipeline.touch_activity(&caller, &notifier).await;

        assert_eq!(h.slots.load_counter("b1").await.unwrap().count, 0);
        let resets = notifier
            .messages()
            .iter()
            .filter(|m| m.contains("Session reset"))
            .count();
        assert_eq!(resets, 1);

        // Later activity does not fire the notice again.
        h.pipeline.touch_activity(&caller, &notifier).await;
        let resets = notifier
            .messages()
            .iter()
            .filter(|m| m.contains("Session reset"))
            .count();
        assert_eq!(resets, 1);
    }

    #[tokio::test]
    async fn recent_activity_does_not_reset_the_counter() {
        let h = harness();
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        h.slots
            .save_counter(
                "b1",
                AnonCounter {
                    count: 3,
                    last_activity_ms: 1_700_000_000_000,
                },
            )
            .await
            .unwrap();

        h.clock
            .jump_to(1_700_000_000_000 + DEFAULT_INACTIVITY_TIMEOUT_MS - 1000);
        h.pipeline.touch_activity(&caller, &notifier).await;

        assert_eq!(h.slots.load_counter("b1").await.unwrap().count, 3);
        assert!(notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn resume_replays_a_stored_request_exactly_once() {
        let h = harness();
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        h.slots.save_pending(&caller, &sample_form()).await.unwrap();

        let item = h.pipeline.resume(&caller, &notifier).await.unwrap();
        assert!(item.is_some());
        assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);
        assert!(h.slots.load_pending(&caller).await.unwrap().is_none());

        // The slot was cleared, so a second resume finds nothing.
        let item = h.pipeline.resume(&caller, &notifier).await.unwrap();
        assert!(item.is_none());
        assert_eq!(h.script.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn conceptless_pending_slot_is_discarded_without_a_call() {
        let h = harness();
        let caller = Caller::Anonymous("b1".into());
        let notifier = RecordingNotifier::default();

        let mut form = sample_form();
        form.concept = "   ".into();
        h.slots.save_pending(&caller, &form).await.unwrap();

        let item = h.pipeline.resume(&caller, &notifier).await.unwrap();
        assert!(item.is_none());
        assert_eq!(h.script.calls.load(Ordering::SeqCst), 0);
        assert!(h.slots.load_pending(&caller).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incomplete_form_is_rejected_up_front() {
        let h = harness();
        let notifier = RecordingNotifier::default();

        let mut form = sample_form();
        form.voice = String::new();

        let err = h
            .pipeline
            .generate(&Caller::Anonymous("b1".into()), &form, &notifier)
            .await
            .unwrap_err();

        assert_eq!(err, GenerationError::IncompleteForm);
        assert_eq!(h.script.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn attach_scene_image_patches_the_stored_scene() {
        let h = harness();
        let user = Uuid::new_v4();
        let caller = Caller::User(user);
        let notifier = RecordingNotifier::default();

        let item = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();

        let url = h
            .pipeline
            .attach_scene_image(user, item.id, 2)
            .await
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));

        let history = h.slots.load_history(user).await.unwrap();
        let scenes = &history[0].content.scenes;
        assert_eq!(scenes[1].image_url.as_deref(), Some(url.as_str()));
        assert!(scenes[0].image_url.is_none());

        // Unknown scene numbers are rejected.
        assert_eq!(
            h.pipeline.attach_scene_image(user, item.id, 99).await,
            Err(GenerationError::NotFound)
        );
    }

    #[tokio::test]
    async fn feedback_vote_is_recorded_on_the_history_item() {
        let h = harness();
        let user = Uuid::new_v4();
        let caller = Caller::User(user);
        let notifier = RecordingNotifier::default();

        let item = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();

        h.pipeline
            .submit_feedback(user, item.id, Feedback::Positive, &notifier)
            .await
            .unwrap();

        let history = h.slots.load_history(user).await.unwrap();
        assert_eq!(history[0].feedback, Some(Feedback::Positive));
        assert!(notifier
            .messages()
            .iter()
            .any(|m| m.contains("Thank you for your feedback")));
    }

    #[tokio::test]
    async fn history_delete_and_clear() {
        let h = harness();
        let user = Uuid::new_v4();
        let caller = Caller::User(user);
        let notifier = RecordingNotifier::default();

        let first = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();
        let second = h
            .pipeline
            .generate(&caller, &sample_form(), &notifier)
            .await
            .unwrap();

        h.pipeline.delete_history_item(user, first.id).await.unwrap();
        let history = h.pipeline.list_history(user).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, second.id);

        assert_eq!(
            h.pipeline.delete_history_item(user, first.id).await,
            Err(GenerationError::NotFound)
        );

        h.pipeline.clear_history(user).await.unwrap();
        assert!(h.pipeline.list_history(user).await.unwrap().is_empty());
    }

    #[test]
    fn state_machine_allows_only_the_documented_transitions() {
        use GenerationState::*;

        assert!(Idle.can_transition_to(GeneratingScript));
        assert!(GeneratingScript.can_transition_to(GeneratingAudio));
        assert!(GeneratingScript.can_transition_to(Failed));
        assert!(GeneratingAudio.can_transition_to(Succeeded));
        assert!(GeneratingAudio.can_transition_to(Failed));
        assert!(Succeeded.can_transition_to(GeneratingScript));
        assert!(Failed.can_transition_to(GeneratingScript));

        assert!(!Idle.can_transition_to(GeneratingAudio));
        assert!(!Idle.can_transition_to(Succeeded));
        assert!(!GeneratingAudio.can_transition_to(GeneratingScript));
        assert!(!Succeeded.can_transition_to(Failed));
    }
}
