pub mod health;
pub mod jobs;
pub mod logs;
pub mod models;
pub mod progress;
