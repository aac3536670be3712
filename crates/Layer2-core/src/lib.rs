//! r2r-core: extension resolution
//!
//! Layer2 - 설정된 확장을 실행 가능한 이미지 참조로 변환합니다.
//!
//! # 주요 모듈
//!
//! - `resolver`: pinning 정책 + cache-then-client 조회
//!
//! # 사용 예시
//!
//! ```ignore
//! use r2r_core::ExtensionResolver;
//!
//! let mut resolver = ExtensionResolver::new(cache, Arc::new(GhcrClient::new(settings)?));
//! let resolution = resolver.resolve(config.extension("pwsh")?, strict).await?;
//! println!("{}", resolution.reference);
//! ```

pub mod resolver;

pub use resolver::{ExtensionResolver, Resolution, ResolutionSource, TagReport};
