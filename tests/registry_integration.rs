use std::sync::Arc;
use std::time::Duration;

use omni_downloader::driver::sim::SimDriver;
use omni_downloader::registry::error::RegistryError;
use omni_downloader::registry::events::TaskEvent;
use omni_downloader::registry::task::{TaskFilter, TaskId, TaskKind, TaskStatus};
use omni_downloader::registry::{DownloadHub, TaskRegistry};
use omni_downloader::source::models::{InitialMetadata, SourceInput};

fn direct_input() -> SourceInput {
    SourceInput::url("https://x/file.zip")
}

fn magnet_input() -> SourceInput {
    SourceInput::url(
        "magnet:?xt=urn:btih:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa&dn=ubuntu.iso",
    )
}

fn social_input() -> SourceInput {
    SourceInput::url("https://www.youtube.com/watch?v=abc123")
}

/// 轮询等待任务到达指定状态（驱动是异步推进的）
async fn wait_for_status(registry: &TaskRegistry, id: TaskId, status: TaskStatus) -> bool {
    for _ in 0..400 {
        if let Ok(snap) = registry.get(id).await {
            if snap.status == status {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_add_task_queued_with_fresh_id() {
    let registry = TaskRegistry::new();

    let first = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    let second = registry
        .add_task(TaskKind::Torrent, &magnet_input(), None)
        .await
        .unwrap();

    // 新任务总是排队状态、进度为零、id 互不相同
    assert_eq!(first.status, TaskStatus::Queued);
    assert_eq!(second.status, TaskStatus::Queued);
    assert_eq!(first.progress_ratio, 0.0);
    assert_ne!(first.id, second.id);

    // 列表按到达顺序倒排，新任务在前
    let all = registry.list(TaskFilter::All).await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.id);
    assert_eq!(all[1].id, first.id);
}

#[tokio::test]
async fn test_direct_progress_lifecycle() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    assert_eq!(snap.status, TaskStatus::Queued);
    assert_eq!(snap.progress_ratio, 0.0);
    assert_eq!(snap.display_name, "file.zip");

    // 首次进度上报把排队中的任务带入下载中
    registry
        .report_progress(snap.id, 50, Some(100), 1024)
        .await
        .unwrap();
    let mid = registry.get(snap.id).await.unwrap();
    assert_eq!(mid.status, TaskStatus::Active);
    assert!((mid.progress_ratio - 0.5).abs() < f64::EPSILON);
    assert_eq!(mid.transferred_bytes, 50);
    assert_eq!(mid.rate_bytes_per_sec, 1024);

    // 传满后自动完结
    registry
        .report_progress(snap.id, 100, Some(100), 0)
        .await
        .unwrap();
    let done = registry.get(snap.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!((done.progress_ratio - 1.0).abs() < f64::EPSILON);
    assert_eq!(done.rate_bytes_per_sec, 0);
}

#[tokio::test]
async fn test_pause_resume_toggle_from_queued() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Torrent, &magnet_input(), None)
        .await
        .unwrap();

    // 排队中视同暂停，开关直接进入下载中
    let resumed = registry.pause_or_resume(snap.id).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::Active);

    let paused = registry.pause_or_resume(snap.id).await.unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);
    assert_eq!(paused.rate_bytes_per_sec, 0);

    let resumed_again = registry.pause_or_resume(snap.id).await.unwrap();
    assert_eq!(resumed_again.status, TaskStatus::Active);
}

#[tokio::test]
async fn test_pause_resume_is_involution_from_active() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    registry
        .report_progress(snap.id, 10, Some(100), 512)
        .await
        .unwrap();

    // 连按两次开关应回到下载中
    registry.pause_or_resume(snap.id).await.unwrap();
    let back = registry.pause_or_resume(snap.id).await.unwrap();
    assert_eq!(back.status, TaskStatus::Active);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();

    registry
        .report_progress(snap.id, 100, Some(1000), 2048)
        .await
        .unwrap();
    // 回退的上报不是错误，但进度按原值截断
    registry
        .report_progress(snap.id, 40, Some(1000), 2048)
        .await
        .unwrap();

    let current = registry.get(snap.id).await.unwrap();
    assert_eq!(current.transferred_bytes, 100);
    assert_eq!(current.status, TaskStatus::Active);
}

#[tokio::test]
async fn test_paused_task_freezes_progress() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    registry
        .report_progress(snap.id, 30, Some(100), 512)
        .await
        .unwrap();
    registry.pause_or_resume(snap.id).await.unwrap();

    // 暂停期间的上报被丢弃，进度冻结
    registry
        .report_progress(snap.id, 80, Some(100), 512)
        .await
        .unwrap();
    let current = registry.get(snap.id).await.unwrap();
    assert_eq!(current.status, TaskStatus::Paused);
    assert_eq!(current.transferred_bytes, 30);
}

#[tokio::test]
async fn test_terminal_task_rejects_commands() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    registry
        .report_progress(snap.id, 100, Some(100), 0)
        .await
        .unwrap();
    assert_eq!(
        registry.get(snap.id).await.unwrap().status,
        TaskStatus::Completed
    );

    // 终态任务除移除外一律拒绝
    assert!(matches!(
        registry.pause_or_resume(snap.id).await,
        Err(RegistryError::InvalidTransition { .. })
    ));
    assert!(matches!(
        registry.report_progress(snap.id, 200, Some(200), 0).await,
        Err(RegistryError::InvalidTransition { .. })
    ));
    assert!(matches!(
        registry.report_failure(snap.id, "太迟了").await,
        Err(RegistryError::InvalidTransition { .. })
    ));
    assert!(matches!(
        registry.cancel(snap.id).await,
        Err(RegistryError::InvalidTransition { .. })
    ));

    // 移除永远可用
    registry.remove(snap.id).await.unwrap();
}

#[tokio::test]
async fn test_remove_then_not_found() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    registry.remove(snap.id).await.unwrap();

    assert!(matches!(
        registry.get(snap.id).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        registry.pause_or_resume(snap.id).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        registry.report_progress(snap.id, 1, None, 0).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        registry.remove(snap.id).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_is_terminal() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    registry
        .report_progress(snap.id, 10, Some(100), 256)
        .await
        .unwrap();

    let canceled = registry.cancel(snap.id).await.unwrap();
    assert_eq!(canceled.status, TaskStatus::Canceled);
    assert_eq!(canceled.rate_bytes_per_sec, 0);

    // 已取消的任务不能重试，也不能再取消
    assert!(matches!(
        registry.retry(snap.id).await,
        Err(RegistryError::InvalidTransition { .. })
    ));
    assert!(matches!(
        registry.cancel(snap.id).await,
        Err(RegistryError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_failure_and_retry() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    registry
        .report_progress(snap.id, 60, Some(100), 512)
        .await
        .unwrap();

    registry.report_failure(snap.id, "连接中断").await.unwrap();
    let failed = registry.get(snap.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Error);
    assert_eq!(failed.error_detail.as_deref(), Some("连接中断"));
    assert_eq!(failed.rate_bytes_per_sec, 0);

    // 重复上报失败是幂等的
    registry.report_failure(snap.id, "连接中断").await.unwrap();

    // 重试回到排队状态，这是进度的显式重置点
    let retried = registry.retry(snap.id).await.unwrap();
    assert_eq!(retried.status, TaskStatus::Queued);
    assert_eq!(retried.transferred_bytes, 0);
    assert_eq!(retried.progress_ratio, 0.0);
    assert!(retried.error_detail.is_none());
    // 已确定的总大小保留
    assert_eq!(retried.size_bytes, Some(100));
}

#[tokio::test]
async fn test_metadata_correction_only_once() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Torrent, &magnet_input(), None)
        .await
        .unwrap();
    // 磁力链接的 dn 参数作为初始显示名
    assert_eq!(snap.display_name, "ubuntu.iso");

    registry
        .report_metadata(snap.id, Some("ubuntu-23.04-desktop-amd64.iso"), Some(4_200))
        .await
        .unwrap();
    let corrected = registry.get(snap.id).await.unwrap();
    assert_eq!(corrected.display_name, "ubuntu-23.04-desktop-amd64.iso");
    assert_eq!(corrected.size_bytes, Some(4_200));

    // 第二次修正被忽略，大小一经确定不再改变
    registry
        .report_metadata(snap.id, Some("别的名字"), Some(9_999))
        .await
        .unwrap();
    let unchanged = registry.get(snap.id).await.unwrap();
    assert_eq!(unchanged.display_name, "ubuntu-23.04-desktop-amd64.iso");
    assert_eq!(unchanged.size_bytes, Some(4_200));
}

#[tokio::test]
async fn test_initial_metadata_overrides_display_name() {
    let registry = TaskRegistry::new();
    let metadata = InitialMetadata {
        display_name: Some("自定义名称.zip".to_string()),
        size_bytes: Some(2048),
    };
    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), Some(metadata))
        .await
        .unwrap();
    assert_eq!(snap.display_name, "自定义名称.zip");
    assert_eq!(snap.size_bytes, Some(2048));
}

#[tokio::test]
async fn test_unknown_size_completion_signal() {
    let registry = TaskRegistry::new();
    let snap = registry
        .add_task(TaskKind::Social, &social_input(), None)
        .await
        .unwrap();

    // 大小未知时不猜测进度
    registry
        .report_progress(snap.id, 500_000, None, 128_000)
        .await
        .unwrap();
    let mid = registry.get(snap.id).await.unwrap();
    assert_eq!(mid.status, TaskStatus::Active);
    assert_eq!(mid.progress_ratio, 0.0);
    assert_eq!(mid.size_bytes, None);

    // 显式完结信号把进度带到 1.0
    registry.report_completed(snap.id).await.unwrap();
    let done = registry.get(snap.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!((done.progress_ratio - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_list_filters() {
    let registry = TaskRegistry::new();
    let direct = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    let torrent = registry
        .add_task(TaskKind::Torrent, &magnet_input(), None)
        .await
        .unwrap();
    let social = registry
        .add_task(TaskKind::Social, &social_input(), None)
        .await
        .unwrap();

    // direct 完结，torrent 下载中，social 保持排队
    registry
        .report_progress(direct.id, 100, Some(100), 0)
        .await
        .unwrap();
    registry
        .report_progress(torrent.id, 10, Some(100), 256)
        .await
        .unwrap();

    let completed = registry
        .list(TaskFilter::ByStatus(TaskStatus::Completed))
        .await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, direct.id);

    let torrents = registry.list(TaskFilter::ByKind(TaskKind::Torrent)).await;
    assert_eq!(torrents.len(), 1);
    assert_eq!(torrents[0].id, torrent.id);

    // Active 投影同时包含下载中与排队中
    let active = registry.list(TaskFilter::Active).await;
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|s| s.id == torrent.id));
    assert!(active.iter().any(|s| s.id == social.id));
}

#[tokio::test]
async fn test_stats_recomputed_from_task_set() {
    let registry = TaskRegistry::new();
    let a = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    let b = registry
        .add_task(TaskKind::Direct, &SourceInput::url("https://x/b.zip"), None)
        .await
        .unwrap();

    registry
        .report_progress(a.id, 100, Some(100), 0)
        .await
        .unwrap();
    registry
        .report_progress(b.id, 30, Some(100), 2048)
        .await
        .unwrap();

    let stats = registry.stats().await;
    assert_eq!(stats.num_completed, 1);
    assert_eq!(stats.num_active, 1);
    assert_eq!(stats.total_rate_bytes_per_sec, 2048);
    assert_eq!(stats.transferred_bytes, 130);
    assert!(!stats.is_idle());

    registry.cancel(b.id).await.unwrap();
    assert!(registry.stats().await.is_idle());
}

#[tokio::test]
async fn test_event_stream() {
    let registry = TaskRegistry::new();
    let mut events = registry.subscribe();

    let snap = registry
        .add_task(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        TaskEvent::TaskAdded { snapshot } => assert_eq!(snapshot.id, snap.id),
        other => panic!("期望 TaskAdded，收到 {:?}", other),
    }

    registry
        .report_progress(snap.id, 10, Some(100), 512)
        .await
        .unwrap();
    match events.recv().await.unwrap() {
        TaskEvent::StatusChanged { id, status } => {
            assert_eq!(id, snap.id);
            assert_eq!(status, TaskStatus::Active);
        }
        other => panic!("期望 StatusChanged，收到 {:?}", other),
    }
    match events.recv().await.unwrap() {
        TaskEvent::Progress {
            id,
            transferred_bytes,
            ..
        } => {
            assert_eq!(id, snap.id);
            assert_eq!(transferred_bytes, 10);
        }
        other => panic!("期望 Progress，收到 {:?}", other),
    }

    registry.remove(snap.id).await.unwrap();
    match events.recv().await.unwrap() {
        TaskEvent::TaskRemoved { id } => assert_eq!(id, snap.id),
        other => panic!("期望 TaskRemoved，收到 {:?}", other),
    }
}

// --------------------------------------------------------------------
// 装配层 + 模拟驱动的端到端场景
// --------------------------------------------------------------------

#[tokio::test]
async fn test_hub_simulated_end_to_end() {
    let mut hub = DownloadHub::new(2);
    let sim = Arc::new(
        SimDriver::new(hub.registry().clone())
            .with_tick(Duration::from_millis(2))
            .with_default_size(1024),
    );
    for kind in [TaskKind::Direct, TaskKind::Torrent, TaskKind::Social] {
        hub.register_driver(kind, sim.clone());
    }

    let direct = hub
        .submit(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    let torrent = hub
        .submit(TaskKind::Torrent, &magnet_input(), None)
        .await
        .unwrap();
    let social = hub
        .submit(TaskKind::Social, &social_input(), None)
        .await
        .unwrap();

    hub.join().await;

    let stats = hub.registry().stats().await;
    assert_eq!(stats.num_completed, 3);
    assert!(stats.is_idle());

    // 种子任务经历了元数据交换，总大小已确定
    let torrent_snap = hub.registry().get(torrent.id).await.unwrap();
    assert_eq!(torrent_snap.size_bytes, Some(1024));
    assert_eq!(torrent_snap.display_name, "ubuntu.iso");

    for id in [direct.id, social.id] {
        let snap = hub.registry().get(id).await.unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert!((snap.progress_ratio - 1.0).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn test_remove_active_task_stops_driver() {
    let mut hub = DownloadHub::new(1);
    // 足够大的模拟文件，保证移除发生在传输中途
    let sim = Arc::new(
        SimDriver::new(hub.registry().clone())
            .with_tick(Duration::from_millis(10))
            .with_default_size(64 * 1024 * 1024),
    );
    hub.register_driver(TaskKind::Direct, sim);

    let snap = hub
        .submit(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    assert!(wait_for_status(hub.registry(), snap.id, TaskStatus::Active).await);

    // 移除立即生效，取消信号让驱动合作式退出
    hub.registry().remove(snap.id).await.unwrap();
    hub.join().await;

    assert!(matches!(
        hub.registry().get(snap.id).await,
        Err(RegistryError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_hub_retry_redispatches_driver() {
    let mut hub = DownloadHub::new(1);
    let sim = Arc::new(
        SimDriver::new(hub.registry().clone())
            .with_tick(Duration::from_millis(2))
            .with_default_size(1024)
            .with_failure_after(3),
    );
    hub.register_driver(TaskKind::Direct, sim);

    let snap = hub
        .submit(TaskKind::Direct, &direct_input(), None)
        .await
        .unwrap();
    assert!(wait_for_status(hub.registry(), snap.id, TaskStatus::Error).await);
    hub.join().await;

    // 重试重新派发驱动，第二次同样在第 3 个时间片失败
    hub.retry(snap.id).await.unwrap();
    assert!(wait_for_status(hub.registry(), snap.id, TaskStatus::Error).await);
    hub.join().await;

    let failed = hub.registry().get(snap.id).await.unwrap();
    assert_eq!(failed.error_detail.as_deref(), Some("模拟传输失败"));
}
