pub mod reminder_service;
pub mod row_store;
pub mod sheets_service;
pub mod submission_service;
pub mod telegram_service;
