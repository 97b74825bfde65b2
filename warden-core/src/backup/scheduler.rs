use super::{BackupManager, BackupOutcome, archive};
use crate::config::BackupConfig;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 按修改时间保留归档的时长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
}

impl RetentionPolicy {
    pub fn from_hours(hours: u64) -> Self {
        Self {
            window: Duration::from_secs(hours.saturating_mul(3600)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub interval: Duration,
    pub initial_delay: Duration,
    pub retention: RetentionPolicy,
}

impl From<&BackupConfig> for ScheduleConfig {
    fn from(config: &BackupConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_minutes.saturating_mul(60)),
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            retention: RetentionPolicy::from_hours(config.retention_hours),
        }
    }
}

/// 一次 tick 需要的共享状态
struct Tick {
    server_id: String,
    manager: Arc<BackupManager>,
    retention: RetentionPolicy,
    last_backup: Mutex<Option<DateTime<Local>>>,
}

struct Armed {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// 单个服务器的定时备份句柄
pub struct BackupSchedule {
    tick: Arc<Tick>,
    interval: Duration,
    initial_delay: Duration,
    armed: Mutex<Option<Armed>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BackupSchedule {
    pub fn new(server_id: impl Into<String>, manager: Arc<BackupManager>, config: ScheduleConfig) -> Self {
        Self {
            tick: Arc::new(Tick {
                server_id: server_id.into(),
                manager,
                retention: config.retention,
                last_backup: Mutex::new(None),
            }),
            interval: config.interval,
            initial_delay: config.initial_delay,
            armed: Mutex::new(None),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.tick.server_id
    }

    /// 开始定时备份；已在运行时不做任何事，返回是否新启动
    pub fn arm(&self) -> bool {
        let mut armed = lock(&self.armed);
        if armed.as_ref().is_some_and(|a| !a.task.is_finished()) {
            debug!(server = %self.tick.server_id, "定时备份已在运行");
            return false;
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.tick.clone(),
            self.interval,
            self.initial_delay,
            token.clone(),
        ));
        *armed = Some(Armed { token, task });

        info!(
            server = %self.tick.server_id,
            interval_secs = self.interval.as_secs(),
            "定时备份已启动"
        );
        true
    }

    /// 停止定时备份；正在进行的备份会继续完成
    pub fn disarm(&self) -> bool {
        match lock(&self.armed).take() {
            Some(armed) => {
                armed.token.cancel();
                info!(server = %self.tick.server_id, "定时备份已停止");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.armed)
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    /// 最近一次成功备份的时间
    pub fn last_backup(&self) -> Option<DateTime<Local>> {
        *lock(&self.tick.last_backup)
    }

    /// 立即执行一次本服务器的备份（不影响定时周期）
    pub async fn run_once(&self) -> Vec<BackupOutcome> {
        self.tick.run().await
    }

    /// 记录外部触发的备份结果并执行保留策略
    pub async fn record(&self, outcomes: &[BackupOutcome]) {
        self.tick.after_run(outcomes).await;
    }
}

impl Drop for BackupSchedule {
    fn drop(&mut self) {
        if let Some(armed) = lock(&self.armed).take() {
            armed.token.cancel();
        }
    }
}

impl Tick {
    async fn run(&self) -> Vec<BackupOutcome> {
        let outcomes = self.manager.run_for(&self.server_id).await;
        self.after_run(&outcomes).await;
        outcomes
    }

    async fn after_run(&self, outcomes: &[BackupOutcome]) {
        let succeeded: Vec<&BackupOutcome> = outcomes
            .iter()
            .filter(|o| o.server_id == self.server_id && o.is_success())
            .collect();
        if succeeded.is_empty() {
            return;
        }

        *lock(&self.last_backup) = Some(Local::now());

        for outcome in succeeded {
            let Some(handler) = self
                .manager
                .handlers_for(&self.server_id)
                .find(|h| h.name() == outcome.handler)
            else {
                continue;
            };

            let dir = handler.backup_dir().to_path_buf();
            let prefix = handler.archive_prefix().to_string();
            let window = self.retention.window;
            let evicted = tokio::task::spawn_blocking(move || {
                archive::evict_expired(&dir, &prefix, window, SystemTime::now())
            })
            .await;

            match evicted {
                Ok((removed, failures)) => {
                    if !removed.is_empty() {
                        info!(handler = %outcome.handler, removed = removed.len(), "已清理过期备份");
                    }
                    for failure in failures {
                        warn!(handler = %outcome.handler, error = %failure, "清理过期备份失败，跳过");
                    }
                }
                Err(e) => warn!(handler = %outcome.handler, error = %e, "清理任务异常"),
            }
        }
    }
}

async fn run_loop(
    tick: Arc<Tick>,
    period: Duration,
    initial_delay: Duration,
    token: CancellationToken,
) {
    tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(initial_delay) => {}
    }

    let mut interval = tokio::time::interval(period);
    // 备份耗时超过间隔时跳过错过的 tick，不排队补跑
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        // tick 开始后不响应取消，保证归档完整写出
        let outcomes = tick.run().await;
        debug!(server = %tick.server_id, count = outcomes.len(), "定时备份完成一轮");
    }

    debug!(server = %tick.server_id, "定时备份循环退出");
}
