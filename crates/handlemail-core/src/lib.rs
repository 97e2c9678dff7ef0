//! Data model, configuration, and error taxonomy shared by every handlemail
//! crate. No I/O lives here.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{
    CitationSource, EmailAttachment, EmailRequest, ProcessingInstructions, ScheduledTask,
    ScheduledTaskStatus, TaskRun, TaskRunStatus, WhitelistRow,
};
