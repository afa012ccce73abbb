//! 版本标识
//!
//! 版本号是微秒级时间戳，由进程内的生成器保证严格递增

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// 应用内唯一、单调递增的版本号
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VersionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

/// 版本号生成器
///
/// 返回 `max(当前微秒时间戳, 上一个 + 1)`，同一微秒内的多次请求也不会重复
#[derive(Debug, Default)]
pub struct VersionIdGenerator {
    last: AtomicU64,
}

impl VersionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 生成下一个版本号
    pub fn next(&self) -> VersionId {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return VersionId(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// 推进生成器，使后续版本号都大于已存在的版本号
    pub fn observe(&self, existing: VersionId) {
        self.last.fetch_max(existing.0, Ordering::SeqCst);
    }
}
