use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::{self, Notifier};

/// Manages per-event engines. Each event gets its own Engine + WAL +
/// notification worker + compactor. Tenant = event name.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    notifier: Arc<dyn Notifier>,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            notifier,
        }
    }

    /// Get or lazily create an engine for the given event.
    pub fn get_or_create(&self, event_name: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(event_name) {
            return Ok(engine.value().clone());
        }
        if event_name.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "event name too long",
            ));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many events"));
        }

        // Sanitize event name to prevent path traversal
        let safe_name: String = event_name
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty event name",
            ));
        }

        // Entry claim: two concurrent first requests must not each build an
        // engine with its own writer loop on the same WAL file.
        let engine = match self.engines.entry(event_name.to_string()) {
            dashmap::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::Entry::Vacant(v) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let (notify_tx, notify_rx) = mpsc::channel(256);
                let engine = Arc::new(Engine::new(wal_path, notify_tx)?);

                // Spawn notification worker + compactor for this event
                tokio::spawn(notify::run_notifier(notify_rx, self.notifier.clone()));
                let compactor_engine = engine.clone();
                let threshold = self.compact_threshold;
                tokio::spawn(async move {
                    compactor::run_compactor(compactor_engine, threshold).await;
                });

                v.insert(engine.clone());
                engine
            }
        };
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::LogNotifier;
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bunkd_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, 1000, Arc::new(LogNotifier))
    }

    #[tokio::test]
    async fn event_isolation() {
        let dir = test_data_dir("isolation");
        let tm = manager(dir);

        let eng_a = tm.get_or_create("ignitron_2k25").unwrap();
        let eng_b = tm.get_or_create("winter_summit").unwrap();

        // Same email registers fine in both events
        let uid_a = eng_a
            .register_user("Asha".into(), "asha@example.com".into(), String::new(), Role::User)
            .await
            .unwrap();
        eng_b
            .register_user("Asha".into(), "asha@example.com".into(), String::new(), Role::User)
            .await
            .unwrap();

        // A room added to one event is invisible to the other
        let admin = Actor::new(
            eng_a
                .ensure_admin("Admin", "admin@example.com", "")
                .await
                .unwrap()
                .unwrap(),
            Role::Admin,
        );
        eng_a
            .add_room(&admin, "A-101".into(), 2, 2, None)
            .await
            .unwrap();
        assert_eq!(eng_a.list_rooms().await.len(), 1);
        assert!(eng_b.list_rooms().await.is_empty());

        assert!(eng_a.get_user(uid_a).is_some());
        assert!(eng_b.get_user(uid_a).is_none());
    }

    #[tokio::test]
    async fn event_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = manager(dir.clone());

        let entries: Vec<_> = fs::read_dir(&dir).unwrap().collect();
        assert!(entries.is_empty());

        let _eng = tm.get_or_create("my_event").unwrap();
        assert!(dir.join("my_event.wal").exists());
    }

    #[tokio::test]
    async fn event_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_requests_share_one_engine() {
        let dir = test_data_dir("concurrent_first");
        let tm = Arc::new(manager(dir));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let tm = tm.clone();
            handles.push(tokio::spawn(async move { tm.get_or_create("shared") }));
        }

        let mut engines = Vec::new();
        for h in handles {
            engines.push(h.await.unwrap().unwrap());
        }
        // Exactly one Engine (one WAL writer) backs every caller.
        for e in &engines[1..] {
            assert!(Arc::ptr_eq(&engines[0], e));
        }
    }

    #[tokio::test]
    async fn event_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = manager(dir.clone());

        // Path traversal attempt
        let _eng = tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn event_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("event name too long"));
    }

    #[tokio::test]
    async fn event_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let result = tm.get_or_create("one_more");
        assert!(result.is_err());
        assert!(result.err().unwrap().to_string().contains("too many events"));
    }
}
