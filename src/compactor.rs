use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite a tenant's WAL whenever more than `threshold` events were
/// appended since the last compaction. Runs until the engine is dropped
/// by everyone else.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if Arc::strong_count(&engine) == 1 {
            debug!("engine released, compactor exiting");
            return;
        }
        compact_if_needed(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends <= threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            error!("WAL compaction failed after {appends} appends: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("toolshed_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();

        let owner = Ulid::new();
        let tool = Ulid::new();
        engine.register_tool(tool, owner, None).await.unwrap();
        assert!(!compact_if_needed(&engine, 5).await);

        let day = 86_400_000;
        let base = 1_800_000_000_000;
        for i in 0..5 {
            let r = engine
                .create_reservation(NewReservation {
                    id: Ulid::new(),
                    tool_id: tool,
                    requester_id: Ulid::new(),
                    span: Span::new(base + i * day, base + (i + 1) * day),
                    contact: String::new(),
                    comment: String::new(),
                })
                .await
                .unwrap();
            engine.deny(r.id, owner).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 11);

        assert!(compact_if_needed(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.get_tool_reservations(tool).len(), 5);
    }

    #[tokio::test]
    async fn compactor_exits_when_engine_dropped() {
        let path = test_wal_path("exit.wal");
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap());
        let task = tokio::spawn(run_compactor(engine.clone(), 1000));
        drop(engine);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}
