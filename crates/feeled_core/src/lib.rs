pub mod audio;
pub mod domain;
pub mod generation;
pub mod ports;
pub mod share;
pub mod slots;

pub use domain::{
    AvatarCustomization, AvatarStyle, Caller, Feedback, GeneratedContent, HistoryItem,
    LessonFormData, LessonScript, Quiz, QuizOption, Scene, SharedLesson, User, UserCredentials,
};
pub use generation::{GenerationError, GenerationState, LessonPipeline};
pub use ports::{
    AudioSynthesisService, Clock, IdentityService, ImageSynthesisService, KeyValueStore, Notice,
    NoticeKind, Notifier, PortError, PortResult, ScriptGenerationService, SystemClock,
};
pub use slots::Slots;
