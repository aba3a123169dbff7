pub mod config;
pub mod entity;
pub mod event;
pub mod hook;
pub mod mq;
pub mod notification;
pub mod pipeline_job;
pub mod points;
pub mod storage;
pub mod store;
pub mod submission_status;

pub use points::{Points, PointsError};
pub use submission_status::SubmissionStatus;
