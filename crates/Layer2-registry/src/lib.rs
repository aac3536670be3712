//! # r2r-registry
//!
//! 레지스트리 조회 계층:
//! - `RegistryClient`: 확장 목록 / 태그 목록 조회 trait
//! - `GhcrClient`: GitHub packages API 구현
//! - `RegistryError`: 상세 에러 + 재시도 분류
//!
//! 캐시는 호출자(r2r-core)가 담당합니다. 이 crate는 항상 네트워크를 사용합니다.

pub mod client;
pub mod error;
pub mod ghcr;
pub mod retry;

pub use client::{RegistryClient, RegistryCredentials, TagListing};
pub use error::RegistryError;
pub use ghcr::GhcrClient;
pub use retry::{with_retry, RetryClassification, RetryConfig, RetryableError};
