//! 전송 계층 (TCP)
//!
//! - Connector: 경로별 소켓 설정(configure) 및 연결(connect)
//! - Connection: 배치 송신, 정상 종료

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpSocket, TcpStream};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::engine::TransmitBatch;
use crate::fragment::FragmentData;
use crate::memory::MemoryReader;
use crate::path::NetworkPath;
use crate::{Error, Result};

/// 성립된 연결
#[allow(async_fn_in_trait)]
pub trait Connection {
    /// 배치 하나를 송신하고 완료까지 대기한다 (push, non-urgent).
    async fn transmit<M: MemoryReader + ?Sized>(
        &mut self,
        batch: &TransmitBatch<'_>,
        memory: &M,
        cancel: &CancelToken,
    ) -> Result<()>;

    /// 정상 종료 요청 후 완료까지 대기
    async fn close(&mut self) -> Result<()>;
}

/// 경로별 연결 생성기
#[allow(async_fn_in_trait)]
pub trait Connector {
    /// 설정은 끝났지만 아직 연결되지 않은 엔드포인트
    type Endpoint;
    type Conn: Connection;

    /// 설정 초기화 후 적용. 로컬 주소가 아직 없으면 `AddressPending`.
    async fn configure(&self, path: &NetworkPath, config: &Config) -> Result<Self::Endpoint>;

    /// 원격 리스너에 연결 (타임아웃/취소는 호출자가 건다)
    async fn connect(&self, endpoint: Self::Endpoint, config: &Config) -> Result<Self::Conn>;
}

/// tokio TCP 기반 연결 생성기
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }

    fn build_socket(path: &NetworkPath, config: &Config) -> io::Result<Socket> {
        let remote = config.remote_socket_addr();
        let domain = if remote.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let params = &config.transport;

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nodelay(true)?;
        if remote.is_ipv4() {
            socket.set_ttl(params.time_to_live as u32)?;
            #[cfg(target_os = "linux")]
            socket.set_tos(params.type_of_service as u32)?;
        } else {
            socket.set_unicast_hops_v6(params.time_to_live as u32)?;
        }

        let local_ip = match path.local_addr {
            Some(ip) => Some(ip),
            // 임시 포트가 아니면 지정 포트로 와일드카드 바인드
            None if params.station_port != 0 => Some(match remote.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            }),
            None => None,
        };
        if let Some(ip) = local_ip {
            socket.bind(&SocketAddr::new(ip, params.station_port).into())?;
        }

        socket.set_nonblocking(true)?;
        Ok(socket)
    }
}

impl Connector for TcpConnector {
    type Endpoint = TcpSocket;
    type Conn = TcpConnection;

    async fn configure(&self, path: &NetworkPath, config: &Config) -> Result<TcpSocket> {
        config.validate_local_addr(path.local_addr)?;
        if let Some(local) = path.local_addr {
            if local.is_ipv4() != config.remote_addr.is_ipv4() {
                return Err(Error::Transport(format!(
                    "경로 {}: 주소 체계 불일치 (원격 {})",
                    path, config.remote_addr
                )));
            }
        }

        // 매 시도마다 새 소켓을 만들어 이전 설정을 초기화한다
        match Self::build_socket(path, config) {
            Ok(socket) => {
                let stream: std::net::TcpStream = socket.into();
                Ok(TcpSocket::from_std_stream(stream))
            }
            Err(e) if e.kind() == io::ErrorKind::AddrNotAvailable => {
                Err(Error::AddressPending(format!("경로 {}: {}", path, e)))
            }
            Err(e) => Err(Error::Transport(format!("경로 {} configure: {}", path, e))),
        }
    }

    async fn connect(&self, endpoint: TcpSocket, config: &Config) -> Result<TcpConnection> {
        let remote = config.remote_socket_addr();
        let stream = endpoint
            .connect(remote)
            .await
            .map_err(|e| Error::Transport(format!("connect {}: {}", remote, e)))?;
        let conn = TcpConnection::new(stream, config.staging_chunk_size);
        match conn.local_addr() {
            Ok(local) => debug!("연결 성립: {} -> {}", local, remote),
            Err(_) => debug!("연결 성립: -> {}", remote),
        }
        Ok(conn)
    }
}

/// TCP 연결
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    staging_chunk_size: usize,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, staging_chunk_size: usize) -> Self {
        Self {
            stream,
            staging_chunk_size: staging_chunk_size.max(1),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    async fn write_all(&mut self, bytes: &[u8], cancel: &CancelToken) -> Result<()> {
        tokio::select! {
            result = self.stream.write_all(bytes) => {
                result.map_err(|e| Error::Transport(format!("send: {}", e)))
            }
            _ = cancel.cancelled() => Err(Error::Aborted),
        }
    }
}

impl Connection for TcpConnection {
    async fn transmit<M: MemoryReader + ?Sized>(
        &mut self,
        batch: &TransmitBatch<'_>,
        memory: &M,
        cancel: &CancelToken,
    ) -> Result<()> {
        // 배치 버퍼: 이 호출이 소유, 반환 시 해제
        let staging_len = self.staging_chunk_size.min(batch.length() as usize);
        let mut staging = Vec::new();
        staging
            .try_reserve_exact(staging_len)
            .map_err(|e| Error::OutOfMemory(format!("배치 버퍼: {}", e)))?;
        staging.resize(staging_len, 0u8);

        for fragment in batch.fragments() {
            match fragment.data() {
                FragmentData::Header(bytes) | FragmentData::NullGuard(bytes) => {
                    self.write_all(&bytes[..fragment.length() as usize], cancel).await?;
                }
                FragmentData::Memory { address } => {
                    let mut offset = 0u64;
                    let total = fragment.length() as u64;
                    while offset < total {
                        cancel.check()?;
                        let n = (total - offset).min(staging.len() as u64) as usize;
                        memory.read_at(address + offset, &mut staging[..n]).map_err(|e| {
                            Error::Transport(format!("메모리 읽기 {:#x}: {}", address + offset, e))
                        })?;
                        self.write_all(&staging[..n], cancel).await?;
                        offset += n as u64;
                    }
                }
            }
        }

        // push: 배치 끝에서 버퍼링된 데이터를 내보낸다
        self.stream
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| Error::Transport(format!("close: {}", e)))
    }
}
