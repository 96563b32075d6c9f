use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::modules::schema::descriptor::{TableDescriptor, TableKind};

/// 表描述 TTL 缓存 / TTL cache of table descriptors
///
/// 读多写少；目录编辑与迁移成功后按表失效。
pub struct DescriptorCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, TableKind), (Instant, Arc<TableDescriptor>)>>,
}

impl DescriptorCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, table_code: &str, kind: TableKind) -> Option<Arc<TableDescriptor>> {
        let entries = self.entries.read();
        entries
            .get(&(table_code.to_string(), kind))
            .filter(|(ts, _)| ts.elapsed() < self.ttl)
            .map(|(_, d)| Arc::clone(d))
    }

    pub fn insert(&self, descriptor: TableDescriptor) -> Arc<TableDescriptor> {
        let d = Arc::new(descriptor);
        self.entries.write().insert(
            (d.table_code.clone(), d.kind),
            (Instant::now(), Arc::clone(&d)),
        );
        d
    }

    /// 失效该表的全部变体 / invalidate every variant of a table
    pub fn invalidate(&self, table_code: &str) {
        self.entries.write().retain(|(code, _), _| code != table_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(code: &str, kind: TableKind) -> TableDescriptor {
        TableDescriptor::build(code, kind, &[]).unwrap()
    }

    #[test]
    fn hit_then_invalidate() {
        let cache = DescriptorCache::new(Duration::from_secs(60));
        cache.insert(descriptor("a", TableKind::Live));
        cache.insert(descriptor("a", TableKind::Draft));
        cache.insert(descriptor("b", TableKind::Live));
        assert!(cache.get("a", TableKind::Draft).is_some());
        cache.invalidate("a");
        assert!(cache.get("a", TableKind::Live).is_none());
        assert!(cache.get("a", TableKind::Draft).is_none());
        assert!(cache.get("b", TableKind::Live).is_some());
    }

    #[test]
    fn expired_entries_miss() {
        let cache = DescriptorCache::new(Duration::from_millis(0));
        cache.insert(descriptor("a", TableKind::Live));
        assert!(cache.get("a", TableKind::Live).is_none());
    }
}
