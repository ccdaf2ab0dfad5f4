use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

/// Background task that rewrites a tenant's WAL as a snapshot once enough
/// appends have accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::notify::ApprovalNotice;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("bunkd_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn sink() -> mpsc::Sender<ApprovalNotice> {
        let (tx, rx) = mpsc::channel(16);
        std::mem::forget(rx);
        tx
    }

    #[tokio::test]
    async fn compaction_resets_append_counter() {
        let path = test_wal_path("counter.wal");
        let engine = Arc::new(Engine::new(path, sink()).unwrap());

        for i in 0..5 {
            engine
                .register_user(
                    format!("User {i}"),
                    format!("u{i}@example.com"),
                    String::new(),
                    Role::User,
                )
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 5);

        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
    }
}
