pub mod file_store;
pub mod history;

pub use file_store::JsonFileStore;
pub use history::{sanitize_payload, HistoryLog, HistoryRecord};
