//! 按客户 ID 的异步互斥锁
//!
//! 同一客户的 activate / suspend 串行执行，不同客户互不影响。
//! 最后一个持有者释放后条目即从表中移除，表大小只取决于并发中的客户数。

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = HashMap<i64, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct CustomerLocks {
    inner: Arc<StdMutex<LockMap>>,
}

/// 客户锁守卫，释放时清理无人等待的条目
pub struct CustomerGuard {
    guard: Option<OwnedMutexGuard<()>>,
    customer_id: i64,
    map: Arc<StdMutex<LockMap>>,
}

fn lock_map(map: &StdMutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CustomerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取客户锁，守卫释放前其它调用方等待
    pub async fn lock(&self, customer_id: i64) -> CustomerGuard {
        // 克隆只在表锁内进行，释放时的引用计数判断才可靠
        let mutex = lock_map(&self.inner)
            .entry(customer_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        CustomerGuard {
            guard: Some(mutex.lock_owned().await),
            customer_id,
            map: self.inner.clone(),
        }
    }

    /// 当前表中的客户数
    pub fn len(&self) -> usize {
        lock_map(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CustomerGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut map = lock_map(&self.map);
        if map
            .get(&self.customer_id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            map.remove(&self.customer_id);
        }
    }
}
