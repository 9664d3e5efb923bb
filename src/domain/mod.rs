pub mod appointments;
pub mod permissions;
pub mod progress;
pub mod scoring;
