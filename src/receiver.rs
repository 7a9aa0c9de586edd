//! 수신자 (리스너측)
//!
//! - 연결을 하나씩 순서대로 받아 덤프 파일로 기록
//! - 파일명: memory.bin, memory1.bin, memory2.bin, ...
//! - 읽기 유휴 타임아웃이 지나면 해당 덤프를 닫고 다음 연결을 기다린다

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::{Error, Result, DEFAULT_PORT};

/// 수신자 설정
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// 바인드 주소
    pub bind_addr: SocketAddr,

    /// 덤프 파일 디렉토리
    pub output_dir: PathBuf,

    /// 읽기 유휴 타임아웃
    pub idle_timeout: Duration,

    /// 읽기 버퍼 크기
    pub buffer_size: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            output_dir: PathBuf::from("."),
            idle_timeout: Duration::from_secs(1),
            buffer_size: 4096,
        }
    }
}

/// 덤프 하나의 결과
#[derive(Debug, Clone)]
pub struct DumpSummary {
    pub path: PathBuf,
    pub peer: SocketAddr,
    pub bytes: u64,
    pub crc32: u32,
    /// 유휴 타임아웃으로 끝났는지 (EOF가 아닌 종료)
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// 덤프 수신 리스너
pub struct Receiver {
    listener: TcpListener,
    config: ReceiverConfig,
    next_index: usize,
}

impl Receiver {
    pub async fn bind(config: ReceiverConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(
            "Receiver listening on {}, output: {}",
            listener.local_addr()?,
            config.output_dir.display()
        );
        Ok(Self {
            listener,
            config,
            next_index: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// n번째 덤프 파일 경로 (0 → memory.bin)
    pub fn dump_path(dir: &Path, index: usize) -> PathBuf {
        if index == 0 {
            dir.join("memory.bin")
        } else {
            dir.join(format!("memory{}.bin", index))
        }
    }

    /// 연결 하나를 받아 덤프. 취소되면 `Aborted`.
    pub async fn accept_one(&mut self, cancel: &CancelToken) -> Result<DumpSummary> {
        let (stream, peer) = tokio::select! {
            accepted = self.listener.accept() => accepted?,
            _ = cancel.cancelled() => return Err(Error::Aborted),
        };
        info!("Connected by {}", peer);

        let path = Self::dump_path(&self.config.output_dir, self.next_index);
        self.next_index += 1;

        self.receive(stream, peer, path, cancel).await
    }

    /// 취소될 때까지 연결을 순서대로 수신. 한 연결의 실패는 리스너를 멈추지 않는다.
    pub async fn run(&mut self, cancel: &CancelToken) -> Result<Vec<DumpSummary>> {
        let mut dumps = Vec::new();
        loop {
            match self.accept_one(cancel).await {
                Ok(summary) => dumps.push(summary),
                Err(Error::Aborted) => break,
                Err(e) => warn!("덤프 수신 실패: {}", e),
            }
        }
        info!("Receiver stopped, {} dumps", dumps.len());
        Ok(dumps)
    }

    async fn receive(
        &self,
        mut stream: TcpStream,
        peer: SocketAddr,
        path: PathBuf,
        cancel: &CancelToken,
    ) -> Result<DumpSummary> {
        let started = Instant::now();
        let mut file = BufWriter::new(File::create(&path).await?);
        let mut buf = vec![0u8; self.config.buffer_size.max(1)];
        let mut hasher = crc32fast::Hasher::new();
        let mut bytes = 0u64;
        let mut timed_out = false;

        loop {
            let read = tokio::select! {
                read = tokio::time::timeout(self.config.idle_timeout, stream.read(&mut buf)) => read,
                _ = cancel.cancelled() => {
                    // 받은 만큼은 남긴다
                    file.flush().await?;
                    return Err(Error::Aborted);
                }
            };

            let n = match read {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    file.flush().await?;
                    return Err(Error::Io(e));
                }
                Err(_) => {
                    warn!("Connection timed out ({}): {} bytes", peer, bytes);
                    timed_out = true;
                    break;
                }
            };

            file.write_all(&buf[..n]).await?;
            hasher.update(&buf[..n]);
            bytes += n as u64;
        }
        file.flush().await?;

        let summary = DumpSummary {
            path,
            peer,
            bytes,
            crc32: hasher.finalize(),
            timed_out,
            elapsed: started.elapsed(),
        };
        info!(
            "덤프 완료: {} <- {}, {} bytes, CRC32 {:08x}, {:.2}s",
            summary.path.display(),
            peer,
            summary.bytes,
            summary.crc32,
            summary.elapsed.as_secs_f64()
        );
        debug!("{:?}", summary);
        Ok(summary)
    }
}
