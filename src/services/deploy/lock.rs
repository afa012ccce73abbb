//! 按应用划分的部署锁
//!
//! 同一应用同一时间只允许一个 deploy / redeploy / undeploy；
//! 不同应用互不影响。等待有上限，超时返回 `DeployInProgress`。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::info;

use crate::domain::app::AppName;
use crate::error::{HostError, HostResult};

/// 应用 → 锁；没有持有者和等待者的条目会被移除
type LockTable = Arc<StdMutex<HashMap<AppName, Arc<Mutex<()>>>>>;

/// 持有期间独占该应用的部署权
pub struct DeployGuard {
    app: AppName,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DeployGuard {
    fn drop(&mut self) {
        // 先释放锁，再检查条目是否还有人引用
        self.guard.take();
        prune(&self.table, &self.app);
    }
}

/// 部署锁表
pub struct DeployLocks {
    table: LockTable,
    timeout: Duration,
}

impl DeployLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            table: Arc::new(StdMutex::new(HashMap::new())),
            timeout,
        }
    }

    fn lock_for(&self, app: &AppName) -> Arc<Mutex<()>> {
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(app.clone()).or_default().clone()
    }

    fn guard(&self, app: &AppName, guard: OwnedMutexGuard<()>) -> DeployGuard {
        DeployGuard {
            app: app.clone(),
            table: self.table.clone(),
            guard: Some(guard),
        }
    }

    /// 获取应用的部署锁，最多等待配置的超时时间
    pub async fn acquire(&self, app: &AppName) -> HostResult<DeployGuard> {
        let lock = self.lock_for(app);

        if let Ok(guard) = lock.clone().try_lock_owned() {
            return Ok(self.guard(app, guard));
        }

        info!(
            app = %app,
            timeout_secs = self.timeout.as_secs(),
            "Another deployment is running, waiting for the deploy lock"
        );

        match tokio::time::timeout(self.timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(self.guard(app, guard)),
            Err(_) => {
                prune(&self.table, app);
                Err(HostError::DeployInProgress { app: app.clone() })
            }
        }
    }

    /// 当前是否有部署持有该应用的锁
    #[cfg(test)]
    fn is_locked(&self, app: &AppName) -> bool {
        let locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        locks.get(app).map_or(false, |lock| lock.try_lock().is_err())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// 只剩锁表自身引用时移除条目
fn prune(table: &LockTable, app: &AppName) {
    let mut locks = table.lock().unwrap_or_else(PoisonError::into_inner);
    if locks
        .get(app)
        .map_or(false, |lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(app);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str) -> AppName {
        AppName::parse(name).unwrap()
    }

    #[tokio::test]
    async fn test_same_app_times_out() {
        let locks = DeployLocks::new(Duration::from_millis(50));
        let _held = locks.acquire(&app("app1")).await.unwrap();
        assert!(locks.is_locked(&app("app1")));

        let err = locks.acquire(&app("app1")).await.err().unwrap();
        assert_eq!(err.kind(), "deploy_in_progress");
    }

    #[tokio::test]
    async fn test_other_apps_are_independent() {
        let locks = DeployLocks::new(Duration::from_millis(50));
        let _held = locks.acquire(&app("app1")).await.unwrap();
        assert!(locks.acquire(&app("app2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(DeployLocks::new(Duration::from_secs(5)));
        let held = locks.acquire(&app("app1")).await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(&app("app1")).await.is_ok() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);
        assert!(waiter.await.unwrap());
        assert!(!locks.is_locked(&app("app1")));
        assert_eq!(locks.tracked(), 0);
    }

    #[tokio::test]
    async fn test_released_locks_are_pruned() {
        let locks = DeployLocks::new(Duration::from_millis(20));
        let first = locks.acquire(&app("app1")).await.unwrap();
        let second = locks.acquire(&app("app2")).await.unwrap();
        assert_eq!(locks.tracked(), 2);

        // 超时的等待者不会留下条目之外的引用
        assert!(locks.acquire(&app("app1")).await.is_err());
        assert_eq!(locks.tracked(), 2);

        drop(first);
        assert_eq!(locks.tracked(), 1);
        assert!(!locks.is_locked(&app("app1")));
        drop(second);
        assert_eq!(locks.tracked(), 0);

        // 条目移除后可以重新获取
        assert!(locks.acquire(&app("app1")).await.is_ok());
    }
}
