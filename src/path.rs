//! 네트워크 경로 관리
//!
//! 후보 경로를 주어진 순서대로 하나씩 시도한다 (동시에 둘 이상 활성화하지 않음).

use std::fmt;
use std::net::IpAddr;

use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::{Error, Result};

/// 연결을 시도할 수 있는 네트워크 경로 (로컬 엔드포인트)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPath {
    /// 경로 ID (목록 내 순서)
    pub id: usize,

    /// 표시용 이름
    pub name: String,

    /// 바인드할 로컬 주소. `None`이면 OS 라우팅에 맡긴다.
    pub local_addr: Option<IpAddr>,
}

impl NetworkPath {
    pub fn new(id: usize, name: impl Into<String>, local_addr: Option<IpAddr>) -> Self {
        Self {
            id,
            name: name.into(),
            local_addr,
        }
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.local_addr {
            Some(addr) => write!(f, "#{} {} ({})", self.id, self.name, addr),
            None => write!(f, "#{} {}", self.id, self.name),
        }
    }
}

/// 순서가 있는 후보 경로 목록
#[derive(Debug, Clone, Default)]
pub struct PathList {
    paths: Vec<NetworkPath>,
}

impl PathList {
    pub fn new() -> Self {
        Self::default()
    }

    /// OS 기본 라우팅을 쓰는 단일 경로
    pub fn default_route() -> Self {
        let mut list = Self::new();
        list.push("default", None);
        list
    }

    /// 로컬 주소 목록으로 생성 (순서 유지)
    pub fn from_local_addrs(addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        let mut list = Self::new();
        for addr in addrs {
            list.push(format!("path{}", list.len()), Some(addr));
        }
        list
    }

    /// 경로 추가, ID 반환
    pub fn push(&mut self, name: impl Into<String>, local_addr: Option<IpAddr>) -> usize {
        let id = self.paths.len();
        self.paths.push(NetworkPath::new(id, name, local_addr));
        id
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&NetworkPath> {
        self.paths.get(id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NetworkPath> {
        self.paths.iter()
    }
}

/// 한 경로에 대한 시도
#[allow(async_fn_in_trait)]
pub trait PathAttempt {
    type Output;

    async fn attempt(&mut self, path: &NetworkPath) -> Result<Self::Output>;
}

/// 경로를 순서대로 시도, 첫 성공 또는 취소에서 멈춘다.
///
/// - 경로가 없으면 `NotFound`
/// - 모든 경로가 실패하면 `AllPathsFailed`
/// - `Aborted`는 흡수하지 않고 즉시 반환 (남은 경로는 시도하지 않음)
pub async fn try_paths<A: PathAttempt>(
    paths: &PathList,
    cancel: &CancelToken,
    attempt: &mut A,
) -> Result<(usize, A::Output)> {
    if paths.is_empty() {
        return Err(Error::NotFound);
    }

    for path in paths.iter() {
        cancel.check()?;

        match attempt.attempt(path).await {
            Ok(output) => {
                info!("경로 {} 전송 성공", path);
                return Ok((path.id, output));
            }
            Err(e) if e.is_aborted() || cancel.is_cancelled() => {
                warn!("경로 {} 중단됨: {}", path, e);
                return Err(Error::Aborted);
            }
            Err(e) => {
                warn!("경로 {} 실패: {}", path, e);
            }
        }
    }

    Err(Error::AllPathsFailed {
        attempted: paths.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 미리 정한 결과를 순서대로 돌려주는 시도
    struct Scripted {
        results: Vec<Result<u32>>,
        visited: Vec<usize>,
        cancel_on: Option<(usize, CancelToken)>,
    }

    impl PathAttempt for Scripted {
        type Output = u32;

        async fn attempt(&mut self, path: &NetworkPath) -> Result<u32> {
            self.visited.push(path.id);
            if let Some((id, token)) = &self.cancel_on {
                if *id == path.id {
                    token.cancel();
                }
            }
            self.results.remove(0)
        }
    }

    fn paths(n: usize) -> PathList {
        PathList::from_local_addrs((0..n).map(|i| IpAddr::from([10, 0, 0, i as u8 + 1])))
    }

    #[tokio::test]
    async fn test_first_success_stops() {
        let mut attempt = Scripted {
            results: vec![Err(Error::Timeout { timeout_ms: 1000 }), Ok(7), Ok(8)],
            visited: vec![],
            cancel_on: None,
        };
        let (id, out) = try_paths(&paths(3), &CancelToken::new(), &mut attempt)
            .await
            .unwrap();

        assert_eq!((id, out), (1, 7));
        assert_eq!(attempt.visited, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_all_failed_and_empty() {
        let mut attempt = Scripted {
            results: vec![
                Err(Error::Transport("refused".into())),
                Err(Error::Timeout { timeout_ms: 1000 }),
            ],
            visited: vec![],
            cancel_on: None,
        };
        let err = try_paths(&paths(2), &CancelToken::new(), &mut attempt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AllPathsFailed { attempted: 2 }));

        let err = try_paths(&PathList::new(), &CancelToken::new(), &mut attempt)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound));
    }

    #[tokio::test]
    async fn test_abort_skips_remaining_paths() {
        let cancel = CancelToken::new();
        let mut attempt = Scripted {
            results: vec![Err(Error::Transport("reset".into())), Ok(1), Ok(2)],
            visited: vec![],
            cancel_on: Some((0, cancel.clone())),
        };
        let err = try_paths(&paths(3), &cancel, &mut attempt).await.unwrap_err();

        assert!(err.is_aborted());
        assert_eq!(attempt.visited, vec![0]);
    }

    #[test]
    fn test_path_display() {
        let list = paths(1);
        assert_eq!(list.get(0).unwrap().to_string(), "#0 path0 (10.0.0.1)");
        assert_eq!(PathList::default_route().get(0).unwrap().to_string(), "#0 default");
    }
}
