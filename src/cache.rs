// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use bytes::Bytes;
use log::warn;
use lru::LruCache;

/// 超过该大小的文件不进入缓存
pub const DEFAULT_CACHE_THRESHOLD: u64 = 10485760; // 10MB

#[derive(Clone)]
struct CacheEntry {
    content: Bytes,
    modified_time: SystemTime,
}

/// file / file_tree 共享的文件内容缓存，以修改时间判定失效
pub struct FileCache {
    cache: LruCache<PathBuf, CacheEntry>,
    threshold: u64,
}

/// 多个响应器共享同一个缓存
pub type SharedCache = Arc<Mutex<FileCache>>;

impl FileCache {
    // 根据容量构造
    pub fn from_capacity(capacity: usize) -> Self {
        let capacity = match NonZeroUsize::new(capacity) {
            Some(c) => c,
            None => {
                warn!("调用from_capacity时指定的大小是0，尚不支持禁用缓存，因此该值将被改为1");
                NonZeroUsize::MIN
            }
        };
        Self {
            cache: LruCache::new(capacity),
            threshold: DEFAULT_CACHE_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn shared(self) -> SharedCache {
        Arc::new(Mutex::new(self))
    }

    // 放入，过大的文件被忽略
    pub fn push(&mut self, path: &Path, bytes: Bytes, modified_time: SystemTime) -> bool {
        if !self.should_cache(bytes.len() as u64) {
            return false;
        }
        let entry = CacheEntry {
            content: bytes,
            modified_time,
        };
        self.cache.put(path.to_path_buf(), entry);
        true
    }

    pub fn should_cache(&self, file_size: u64) -> bool {
        file_size <= self.threshold
    }

    // 查询有效缓存，修改时间不一致的条目被移除
    pub fn find(&mut self, path: &Path, current_modified_time: SystemTime) -> Option<Bytes> {
        let stale = match self.cache.get(path) {
            Some(entry) if entry.modified_time == current_modified_time => {
                return Some(entry.content.clone())
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            self.cache.pop(path);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }
}

/// 锁被污染时恢复并继续
pub fn lock_cache(cache: &SharedCache) -> MutexGuard<'_, FileCache> {
    match cache.lock() {
        Ok(lock) => lock,
        Err(poisoned) => {
            warn!("缓存锁被污染，恢复并继续");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_cache_creation() {
        let cache = FileCache::from_capacity(10);
        assert_eq!(cache.capacity(), 10);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_zero_capacity_falls_back() {
        let cache = FileCache::from_capacity(0);
        assert_eq!(cache.capacity(), 1);
    }

    #[test]
    fn test_cache_push_and_find() {
        let mut cache = FileCache::from_capacity(3);
        let time = SystemTime::now();
        let content = Bytes::from("test content");

        assert!(cache.push(Path::new("file1.txt"), content.clone(), time));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.find(Path::new("file1.txt"), time), Some(content));
    }

    #[test]
    fn test_cache_modified_time_invalidation() {
        let mut cache = FileCache::from_capacity(3);
        let time1 = SystemTime::now();
        let time2 = time1 + Duration::from_secs(10);

        cache.push(Path::new("file1.txt"), Bytes::from("test content"), time1);

        assert!(cache.find(Path::new("file1.txt"), time2).is_none());
        // 过期条目已被移除
        assert!(cache.find(Path::new("file1.txt"), time1).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_lru_eviction() {
        let mut cache = FileCache::from_capacity(2);
        let time = SystemTime::now();

        cache.push(Path::new("file1.txt"), Bytes::from("content1"), time);
        cache.push(Path::new("file2.txt"), Bytes::from("content2"), time);
        cache.find(Path::new("file1.txt"), time);
        cache.push(Path::new("file3.txt"), Bytes::from("content3"), time);

        assert_eq!(cache.len(), 2);
        assert!(cache.find(Path::new("file2.txt"), time).is_none());
        assert!(cache.find(Path::new("file1.txt"), time).is_some());
        assert!(cache.find(Path::new("file3.txt"), time).is_some());
    }

    #[test]
    fn test_cache_threshold() {
        let mut cache = FileCache::from_capacity(3).with_threshold(4);
        let time = SystemTime::now();

        assert!(!cache.push(Path::new("big.txt"), Bytes::from("too large"), time));
        assert!(cache.push(Path::new("ok.txt"), Bytes::from("tiny"), time));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_shared_cache_lock() {
        let shared = FileCache::from_capacity(2).shared();
        let time = SystemTime::now();
        lock_cache(&shared).push(Path::new("a"), Bytes::from("a"), time);
        assert_eq!(lock_cache(&shared).len(), 1);
    }
}
