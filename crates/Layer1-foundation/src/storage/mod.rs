//! Storage module for r2r
//!
//! - `json`: JSON - 범용 파일 저장/로드 (registry cache 등)

mod json;

pub use json::{JsonStore, APP_DIR_NAME};
