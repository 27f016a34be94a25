pub mod audio;
pub mod config;
pub mod document_store;
pub mod error;
pub mod navigation;
pub mod sqlite_store;
pub mod storage;
