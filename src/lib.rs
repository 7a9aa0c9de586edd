//! # limestream
//!
//! 물리 메모리 맵 전체를 TCP로 원격 리스너에 스트리밍하는 포렌식 수집 도구
//!
//! ## 핵심 특징
//! - **LiME 헤더**: 각 메모리 범위 앞에 32바이트 LiME 범위 헤더 (선택)
//! - **4GiB 초과 범위**: 32비트 송신 한도를 넘는 범위도 조각/배치로 분할 전송
//! - **널 주소 처리**: 0번지 범위는 1바이트 가드 + 1번지부터의 데이터로 전송
//! - **경로 페일오버**: 후보 네트워크 경로를 순서대로 시도, 실패 시 다음 경로
//! - **취소 토큰**: 사용자 중단 시 즉시 전체 실행 종료

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod extent;
pub mod fragment;
pub mod header;
pub mod memory;
pub mod path;
pub mod receiver;
pub mod session;
pub mod stats;
pub mod transport;

pub use cancel::CancelToken;
pub use config::{Config, TransportParams};
pub use engine::{TransmitBatch, TransmitEngine};
pub use error::{Error, Result, RunStatus};
pub use extent::{ExtentSource, IomemExtentSource, MemoryDescriptor, MemoryExtent, MemoryType, StaticExtentSource};
pub use fragment::{Fragment, FragmentBuilder, FragmentData, FragmentList};
pub use header::{LimeReader, RangeHeader};
pub use memory::{DeviceMemory, ImageMemory, MemoryReader};
pub use path::{NetworkPath, PathList};
pub use receiver::{DumpSummary, Receiver, ReceiverConfig};
pub use session::{ConnectionSession, RunReport, SessionController, SessionState};
pub use stats::TransferStats;
pub use transport::{Connection, Connector, TcpConnection, TcpConnector};

/// LiME 매직 넘버 ("LiME")
pub const LIME_MAGIC: u32 = 0x4C69_4D45;

/// LiME 범위 헤더 버전
pub const LIME_VERSION: u32 = 1;

/// 단일 송신 호출 / 단일 조각의 최대 길이 (2^32 - 1)
pub const MAX_FRAGMENT: u32 = u32::MAX;

/// 메모리 맵 페이지 크기 (바이트)
pub const PAGE_SIZE: u64 = 4096;

/// 기본 리스너 포트
pub const DEFAULT_PORT: u16 = 42424;

/// 기본 연결 타임아웃 (밀리초)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;
