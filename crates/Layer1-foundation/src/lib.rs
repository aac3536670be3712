//! # r2r-foundation
//!
//! Foundation layer for r2r:
//! - Error: 에러 분류 (policy / registry / daemon / config)
//! - Config: YAML 설정, 확장 정의, 이미지 참조
//! - Storage: JsonStore (원자적 저장)
//! - Cache: RegistryCache (TTL 기반 태그 캐시)
//! - Invocation: 인자 벡터 분리 (framework / payload)
//! - Env: CI / nested container 감지
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  r2r-cli (Layer4)                                       │
//! │     │                                                   │
//! │     ├── r2r-core (resolver) ── r2r-registry (client)    │
//! │     └── r2r-task (image + container session)            │
//! │                     │                                   │
//! │                     ▼                                   │
//! │  r2r-foundation: config, cache, invocation, errors     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod env_detect;
pub mod error;
pub mod invocation;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, PolicyViolation, Result, EXIT_FAILURE};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    ExtensionDefinition, ImageReference, PullPolicy, R2rConfig, RegistrySettings,
    SessionSettings, PINNED_TAG_PREFIX,
};

// ============================================================================
// Cache / Storage
// ============================================================================
pub use cache::{CacheEntry, CatalogueEntry, RegistryCache};
pub use storage::JsonStore;

// ============================================================================
// Invocation / Environment
// ============================================================================
pub use env_detect::Environment;
pub use invocation::ParsedInvocation;
