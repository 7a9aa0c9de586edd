//! 수집/전송 설정

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::{Error, Result, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_PORT};

/// 전송 계층 파라미터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportParams {
    /// IP type-of-service (8 = high throughput)
    pub type_of_service: u8,

    /// IP time-to-live
    pub time_to_live: u8,

    /// 능동 연결 (클라이언트 역할)
    pub active: bool,

    /// 로컬 포트 (0이면 임시 포트)
    pub station_port: u16,

    /// 로컬 주소 자동 할당 사용 (경로에 주소가 없을 때 OS 선택)
    pub use_default_address: bool,
}

impl Default for TransportParams {
    fn default() -> Self {
        Self {
            type_of_service: 8,        // high throughput
            time_to_live: 255,         // 최대값
            active: true,
            station_port: 0,           // 임의 포트
            use_default_address: true, // 자동 할당
        }
    }
}

/// limestream 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 원격 리스너 주소
    pub remote_addr: IpAddr,

    /// 원격 리스너 포트
    pub remote_port: u16,

    /// LiME 범위 헤더 활성화
    pub header_enabled: bool,

    /// 연결 타임아웃 (밀리초)
    pub connect_timeout_ms: u64,

    /// 로컬 주소 미할당 시 재설정 간격 (밀리초)
    pub address_retry_interval_ms: u64,

    /// 메모리 → 소켓 스테이징 버퍼 크기 (바이트)
    pub staging_chunk_size: usize,

    /// 전송 계층 파라미터
    pub transport: TransportParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            remote_port: DEFAULT_PORT,
            header_enabled: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS, // 1초
            address_retry_interval_ms: 100,
            staging_chunk_size: 1024 * 1024, // 1MB
            transport: TransportParams::default(),
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 대상 리스너를 지정한 설정
    pub fn with_target(remote_addr: IpAddr, remote_port: u16) -> Self {
        Self {
            remote_addr,
            remote_port,
            ..Self::default()
        }
    }

    pub fn header_enabled(mut self, enabled: bool) -> Self {
        self.header_enabled = enabled;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// 원격 소켓 주소
    pub fn remote_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_addr, self.remote_port)
    }

    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn address_retry_interval(&self) -> Duration {
        Duration::from_millis(self.address_retry_interval_ms)
    }

    /// 문자열 주소 덮어쓰기 (CLI -i)
    pub fn set_remote_addr_str(&mut self, value: &str) -> Result<()> {
        self.remote_addr = value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidParameter(format!("주소: {}", value)))?;
        Ok(())
    }

    /// 문자열 포트 덮어쓰기 (CLI -p), 0..=65535
    pub fn set_remote_port_str(&mut self, value: &str) -> Result<()> {
        self.remote_port = value
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::InvalidParameter(format!("포트: {}", value)))?;
        Ok(())
    }

    /// 실행 전 검증
    pub fn validate(&self) -> Result<()> {
        if self.remote_addr.is_unspecified() {
            return Err(Error::InvalidParameter("원격 주소가 지정되지 않음".into()));
        }
        if self.remote_addr.is_multicast() {
            return Err(Error::InvalidParameter(format!(
                "멀티캐스트 주소는 사용할 수 없음: {}",
                self.remote_addr
            )));
        }
        if self.staging_chunk_size == 0 {
            return Err(Error::InvalidParameter("staging_chunk_size = 0".into()));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::InvalidParameter("connect_timeout_ms = 0".into()));
        }
        if !self.transport.active {
            return Err(Error::InvalidParameter("수동(listen) 역할은 지원하지 않음".into()));
        }
        Ok(())
    }

    /// 경로의 로컬 주소 검증. 주소가 없으면 자동 할당이 켜져 있어야 한다.
    pub fn validate_local_addr(&self, local_addr: Option<IpAddr>) -> Result<()> {
        if local_addr.is_none() && !self.transport.use_default_address {
            return Err(Error::InvalidParameter(
                "로컬 주소 없음, 자동 할당 비활성화".into(),
            ));
        }
        Ok(())
    }
}
