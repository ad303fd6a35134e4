pub mod task;
pub mod transcription;
