//! 취소 토큰
//!
//! 사용자 중단 신호. 모든 연결/전송 호출에 참조로 전달된다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// 복제 가능한 취소 토큰 (복제본은 같은 상태를 공유)
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 취소 요청. 여러 번 호출해도 무해하다.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// 취소될 때까지 대기
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // 확인 전에 대기자로 등록해 cancel()과의 경합을 막는다
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// 취소되었으면 `Error::Aborted`
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Aborted)
        } else {
            Ok(())
        }
    }
}
