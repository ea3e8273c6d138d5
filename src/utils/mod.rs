//! Utility helpers: atomic JSON files and JSONL logs.
pub mod files;

pub use files::{append_jsonl, atomic_write, read_json, read_jsonl, write_json};
