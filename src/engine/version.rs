use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};

/// 规则状态修订号,每次成功提交重建后递增
#[derive(Debug, Default)]
pub struct VersionManager {
    current_version: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Version {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_version(&self) -> Version {
        let version = self.current_version.fetch_add(1, Ordering::SeqCst) + 1;
        Version {
            version,
            timestamp: Utc::now(),
        }
    }

    pub fn get_current_version(&self) -> u64 {
        self.current_version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_increase_from_one() {
        let versions = VersionManager::new();
        assert_eq!(versions.get_current_version(), 0);
        assert_eq!(versions.create_version().version, 1);
        assert_eq!(versions.create_version().version, 2);
        assert_eq!(versions.get_current_version(), 2);
    }
}
