//! Business services

pub mod academic_calendar;
pub mod transcript_service;

pub use transcript_service::{PersistOutcome, ServiceOptions, TranscriptService};
