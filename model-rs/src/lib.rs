pub mod approval;
pub mod entry;
pub mod era;
pub mod fallback;
pub mod feedback;
pub mod fingerprint;

pub use approval::{ApprovalStatus, TransitionError};
pub use entry::{CacheEntry, EntryKey, SiteKey};
pub use era::{Era, UnknownEra};
pub use fallback::fallback_css;
pub use feedback::{Feedback, FeedbackError, FeedbackPreset, MAX_FEEDBACK_TEXT_CHARS};
pub use fingerprint::{Fingerprint, FingerprintError, PageStructure, RootChild};
