//! Config - 통합 설정 관리
//!
//! - `image.rs` - 이미지 참조 / pull 정책
//! - `extension.rs` - 확장 정의
//! - `settings.rs` - R2rConfig 통합 설정 (YAML)

mod extension;
mod image;
mod settings;

pub use extension::{
    parse_memory_bytes, parse_port_mapping, ExtensionDefinition, PortMapping, DEFAULT_SHELL,
};
pub use image::{is_pinned_tag, ImageReference, PullPolicy, DEFAULT_TAG, PINNED_TAG_PREFIX};
pub use settings::{
    search_paths, CacheSettings, R2rConfig, RegistrySettings, SessionSettings, CONFIG_FILE_NAME,
    PROJECT_DIR_NAME,
};
