pub mod submission;
pub mod telegram;
