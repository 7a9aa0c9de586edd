//! 세션 컨트롤러
//!
//! 경로마다 Configuring → Connecting → Active → Closing → Closed|Failed 순으로
//! 진행하며, 실패하면 다음 경로로 넘어가고 취소되면 실행 전체를 끝낸다.

use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::engine::TransmitEngine;
use crate::extent::{ExtentSource, MemoryExtent};
use crate::fragment::FragmentBuilder;
use crate::memory::MemoryReader;
use crate::path::{try_paths, NetworkPath, PathAttempt, PathList};
use crate::stats::{PathStats, TransferStats};
use crate::transport::{Connection, Connector};
use crate::{Error, Result, RunStatus};

/// 경로별 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Connecting,
    Active,
    Closing,
    Closed,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// 한 경로에 대한 연결 세션. 다음 경로 시도 전에 반드시 닫힌다.
pub struct ConnectionSession<C> {
    path: NetworkPath,
    remote: SocketAddr,
    state: SessionState,
    history: Vec<SessionState>,
    conn: Option<C>,
    failed: bool,
}

impl<C: Connection> ConnectionSession<C> {
    pub fn new(path: NetworkPath, remote: SocketAddr) -> Self {
        Self {
            path,
            remote,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            conn: None,
            failed: false,
        }
    }

    pub fn path(&self) -> &NetworkPath {
        &self.path
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 지금까지 거친 상태들
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    fn transition(&mut self, next: SessionState) {
        debug!("경로 {}: {} -> {}", self.path, self.state, next);
        self.state = next;
        self.history.push(next);
    }

    fn activate(&mut self, conn: C) {
        self.conn = Some(conn);
        self.transition(SessionState::Active);
    }

    /// 실패 표시. Active 이전이면 바로 Failed.
    fn mark_failed(&mut self) {
        self.failed = true;
        if self.conn.is_none() {
            self.transition(SessionState::Failed);
        }
    }

    fn connection(&mut self) -> Option<&mut C> {
        self.conn.as_mut()
    }

    /// Active에 도달한 연결은 실패했더라도 정상 종료를 시도한다 (최선 노력).
    async fn close(&mut self, config: &Config) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.transition(SessionState::Closing);

        match tokio::time::timeout(config.connect_timeout_duration(), conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("경로 {} 종료 실패: {}", self.path, e),
            Err(_) => warn!("경로 {} 종료 타임아웃", self.path),
        }

        let last = if self.failed {
            SessionState::Failed
        } else {
            SessionState::Closed
        };
        self.transition(last);
    }
}

/// 실행 결과
#[derive(Debug)]
pub struct RunReport {
    pub status: RunStatus,
    /// 전송에 성공한 경로
    pub path_id: Option<usize>,
    /// 실패 사유 (성공 시 None)
    pub error: Option<Error>,
    pub stats: TransferStats,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// 세션 컨트롤러
pub struct SessionController<C> {
    config: Config,
    connector: C,
    paths: PathList,
    builder: FragmentBuilder,
    engine: TransmitEngine,
}

impl<C: Connector> SessionController<C> {
    pub fn new(config: Config, connector: C, paths: PathList) -> Self {
        Self {
            builder: FragmentBuilder::new(config.header_enabled),
            engine: TransmitEngine::new(),
            config,
            connector,
            paths,
        }
    }

    /// 조각/배치 한도 변경
    pub fn with_limits(mut self, max_fragment: u32, max_batch: u32) -> Self {
        self.builder = self.builder.with_max_fragment(max_fragment);
        self.engine = self.engine.with_max_batch(max_batch);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &PathList {
        &self.paths
    }

    /// 전체 실행: 범위 열거 → 경로 순회 → 결과 분류
    pub async fn run<S, M>(&self, source: &S, memory: &M, cancel: &CancelToken) -> RunReport
    where
        S: ExtentSource + ?Sized,
        M: MemoryReader + ?Sized,
    {
        let mut stats = TransferStats::new();
        let result = self.run_inner(source, memory, cancel, &mut stats).await;

        let report = match result {
            Ok(path_id) => RunReport {
                status: RunStatus::Success,
                path_id: Some(path_id),
                error: None,
                stats,
            },
            Err(e) => RunReport {
                status: RunStatus::from(&e),
                path_id: None,
                error: Some(e),
                stats,
            },
        };

        match &report.error {
            None => info!("전송 성공: {}", report.stats.summary()),
            Some(e) => error!("전송 실패 ({:?}): {} | {}", report.status, e, report.stats.summary()),
        }
        report
    }

    async fn run_inner<S, M>(
        &self,
        source: &S,
        memory: &M,
        cancel: &CancelToken,
        stats: &mut TransferStats,
    ) -> Result<usize>
    where
        S: ExtentSource + ?Sized,
        M: MemoryReader + ?Sized,
    {
        self.config.validate()?;

        let extents = source.extents().map_err(|e| match e {
            Error::AccessDenied(msg) => Error::AccessDenied(msg),
            other => Error::AccessDenied(other.to_string()),
        })?;
        stats.total_extents = extents.len() as u64;
        stats.total_extent_bytes = extents.iter().map(|e| e.length_bytes()).sum();

        if self.paths.is_empty() {
            return Err(Error::NotFound);
        }
        for path in self.paths.iter() {
            self.config.validate_local_addr(path.local_addr)?;
        }

        info!(
            "메모리 전송 시작: {} 범위, {} bytes -> {} (헤더 {})",
            extents.len(),
            stats.total_extent_bytes,
            self.config.remote_socket_addr(),
            if self.config.header_enabled { "on" } else { "off" }
        );

        let mut attempt = RunAttempt {
            controller: self,
            extents: &extents,
            memory,
            cancel,
            stats,
        };
        let (path_id, ()) = try_paths(&self.paths, cancel, &mut attempt).await?;
        Ok(path_id)
    }

    /// Configuring: 로컬 주소가 준비될 때까지 재설정
    async fn configure(&self, path: &NetworkPath, cancel: &CancelToken) -> Result<C::Endpoint> {
        loop {
            cancel.check()?;
            match self.connector.configure(path, &self.config).await {
                Ok(endpoint) => return Ok(endpoint),
                Err(Error::AddressPending(msg)) => {
                    debug!("{} - {}ms 후 재시도", msg, self.config.address_retry_interval_ms);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.address_retry_interval()) => {}
                        _ = cancel.cancelled() => return Err(Error::Aborted),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Connecting: 타임아웃과 취소를 걸고 연결
    async fn connect(&self, endpoint: C::Endpoint, cancel: &CancelToken) -> Result<C::Conn> {
        cancel.check()?;
        let timeout = self.config.connect_timeout_duration();

        tokio::select! {
            result = tokio::time::timeout(timeout, self.connector.connect(endpoint, &self.config)) => {
                match result {
                    Ok(conn) => conn,
                    Err(_) => Err(Error::Timeout { timeout_ms: self.config.connect_timeout_ms }),
                }
            }
            _ = cancel.cancelled() => Err(Error::Aborted),
        }
    }

    /// Active: 모든 범위를 순서대로 전송
    async fn send_extents<M>(
        &self,
        conn: &mut C::Conn,
        extents: &[MemoryExtent],
        memory: &M,
        cancel: &CancelToken,
        path_stats: &mut PathStats,
    ) -> Result<()>
    where
        M: MemoryReader + ?Sized,
    {
        for (index, extent) in extents.iter().enumerate() {
            cancel.check()?;

            let result = match self.builder.build(extent) {
                Ok(list) => {
                    self.engine
                        .transmit(conn, list, memory, cancel, |n| path_stats.record_batch(n as u64))
                        .await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!("범위 {}/{} {} 전송 실패: {}", index + 1, extents.len(), extent, e);
                return Err(e);
            }
            path_stats.record_extent();
        }
        Ok(())
    }
}

/// 한 번의 실행에서 경로 하나를 시도하는 단위
struct RunAttempt<'a, C, M: ?Sized> {
    controller: &'a SessionController<C>,
    extents: &'a [MemoryExtent],
    memory: &'a M,
    cancel: &'a CancelToken,
    stats: &'a mut TransferStats,
}

impl<'a, C, M> PathAttempt for RunAttempt<'a, C, M>
where
    C: Connector,
    M: MemoryReader + ?Sized,
{
    type Output = ();

    async fn attempt(&mut self, path: &NetworkPath) -> Result<()> {
        let controller = self.controller;
        let config = &controller.config;
        let path_stats = self.stats.begin_path(path.id);
        let mut session = ConnectionSession::<C::Conn>::new(path.clone(), config.remote_socket_addr());

        info!("경로 {} 시도 -> {}", path, session.remote());

        session.transition(SessionState::Configuring);
        let endpoint = match controller.configure(path, self.cancel).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                session.mark_failed();
                path_stats.record_failure(e.to_string());
                return Err(e);
            }
        };

        session.transition(SessionState::Connecting);
        let started = Instant::now();
        let conn = match controller.connect(endpoint, self.cancel).await {
            Ok(conn) => conn,
            Err(e) => {
                session.mark_failed();
                path_stats.record_failure(e.to_string());
                return Err(e);
            }
        };
        path_stats.record_connected(started.elapsed());
        session.activate(conn);
        info!("경로 {} 연결됨, 전송 시작", path);

        let result = match session.connection() {
            Some(conn) => {
                controller
                    .send_extents(conn, self.extents, self.memory, self.cancel, path_stats)
                    .await
            }
            None => Err(Error::Transport("연결 없음".into())),
        };

        if let Err(e) = &result {
            session.mark_failed();
            path_stats.record_failure(e.to_string());
        }
        session.close(config).await;

        result
    }
}
