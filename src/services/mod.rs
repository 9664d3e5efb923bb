pub mod appointments;
pub mod codes;
pub mod enrollments;
pub mod mailer;
pub mod scoring;
