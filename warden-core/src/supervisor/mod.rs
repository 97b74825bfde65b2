//! 服务器进程的启动/停止状态机
//!
//! 状态只按 Stopped → Starting → Running → Stopping → Stopped 迁移。
//! 状态检查与写入在同一个同步锁内完成，锁不会跨越 await；
//! 非法时机的第二次调用会被直接拒绝而不是排队。

mod launcher;

pub use launcher::{ProcessLauncher, StopSignal, SystemLauncher, resolve_program};

use crate::backup::BackupSchedule;
use crate::constants::control::SHUTDOWN_ANNOUNCEMENT;
use crate::constants::poll::TERMINATE_CHECK_INTERVAL_MS;
use crate::control::{self, ControlChannel};
use crate::error::Result;
use crate::probe::{ProcessProbe, ProcessTableProbe, StatusQueryProbe};
use crate::server::ManagedServer;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl SupervisorState {
    pub fn display_name(&self) -> &'static str {
        match self {
            SupervisorState::Stopped => "已停止",
            SupervisorState::Starting => "启动中",
            SupervisorState::Running => "运行中",
            SupervisorState::Stopping => "停止中",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// 进程已启动并通过探测确认
    Started { pid: Option<u32> },
    /// 已在运行或正在启动/停止，本次调用没有任何副作用
    AlreadyRunning,
    /// 服务器在外部已运行，直接接管
    Adopted,
    /// 探测预算耗尽仍未确认，进程保持运行
    Unconfirmed { attempts: u32 },
}

impl StartOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, StartOutcome::Started { .. } | StartOutcome::Adopted)
    }
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartOutcome::Started { pid: Some(pid) } => write!(f, "已启动 (PID {pid})"),
            StartOutcome::Started { pid: None } => write!(f, "已启动"),
            StartOutcome::AlreadyRunning => write!(f, "已在运行或正在启动"),
            StartOutcome::Adopted => write!(f, "已在运行（外部启动，已接管）"),
            StartOutcome::Unconfirmed { attempts } => {
                write!(f, "启动未确认：{attempts} 次探测均未发现服务器，请人工检查")
            }
        }
    }
}

/// 升级为强制终止的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationReason {
    /// 控制通道失败，且进程在等待期内没有退出
    ControlChannel(String),
    /// 关闭指令已送达，但进程在等待期内没有退出
    StillRunning,
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::ControlChannel(e) => write!(f, "控制通道失败: {e}"),
            EscalationReason::StillRunning => write!(f, "关闭超时，进程仍在运行"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// 正常关闭
    Stopped,
    /// 当前未运行，控制通道未被使用
    NotRunning,
    /// 正在启动或停止中
    InTransition,
    /// 经强制终止后退出
    Terminated { reason: EscalationReason },
    /// 强制终止后仍检测到进程
    Unconfirmed { reason: EscalationReason },
}

impl StopOutcome {
    pub fn is_escalated(&self) -> bool {
        matches!(
            self,
            StopOutcome::Terminated { .. } | StopOutcome::Unconfirmed { .. }
        )
    }
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOutcome::Stopped => write!(f, "已正常关闭"),
            StopOutcome::NotRunning => write!(f, "未在运行"),
            StopOutcome::InTransition => write!(f, "正在启动或停止中，请稍后再试"),
            StopOutcome::Terminated { reason } => write!(f, "已强制终止（{reason}）"),
            StopOutcome::Unconfirmed { reason } => {
                write!(f, "强制终止后仍检测到进程（{reason}），请人工检查")
            }
        }
    }
}

/// 供展示层使用的状态快照
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub id: String,
    pub kind: String,
    pub state: SupervisorState,
    pub confirmed: bool,
    pub pid: Option<u32>,
    pub last_started: Option<DateTime<Local>>,
    pub backups_armed: bool,
    pub last_backup: Option<DateTime<Local>>,
}

/// 可替换的外部协作者
pub struct SupervisorParts {
    /// 进程表探测：接管判断、关闭等待、查找 PID
    pub liveness: Arc<dyn ProcessProbe>,
    /// 启动确认探测，配置了状态端口时使用协议查询
    pub readiness: Arc<dyn ProcessProbe>,
    pub control: Arc<dyn ControlChannel>,
    pub launcher: Arc<dyn ProcessLauncher>,
}

impl SupervisorParts {
    pub fn for_server(server: &ManagedServer) -> Self {
        let liveness: Arc<dyn ProcessProbe> =
            Arc::new(ProcessTableProbe::new(&server.marker, server.match_mode));
        let readiness: Arc<dyn ProcessProbe> = match server.control.status_port {
            Some(port) => Arc::new(StatusQueryProbe::new(
                server.control.host.clone(),
                port,
                server.poll.io_timeout,
            )),
            None => liveness.clone(),
        };

        Self {
            liveness,
            readiness,
            control: control::for_server(server),
            launcher: Arc::new(SystemLauncher),
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: SupervisorState,
    confirmed: bool,
    pid: Option<u32>,
    last_started: Option<DateTime<Local>>,
}

/// 单个服务器的进程守护
pub struct ProcessSupervisor {
    server: ManagedServer,
    parts: SupervisorParts,
    inner: Mutex<Inner>,
    schedule: Option<Arc<BackupSchedule>>,
    arm_on_unconfirmed: bool,
}

/// 未完成的状态迁移被丢弃时恢复到终态
struct TransitionGuard<'a> {
    inner: &'a Mutex<Inner>,
    fallback: SupervisorState,
    done: bool,
}

impl<'a> TransitionGuard<'a> {
    fn new(inner: &'a Mutex<Inner>, fallback: SupervisorState) -> Self {
        Self {
            inner,
            fallback,
            done: false,
        }
    }

    fn finish(mut self, state: SupervisorState) {
        lock(self.inner).state = state;
        self.done = true;
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let mut inner = lock(self.inner);
            warn!(from = ?inner.state, to = ?self.fallback, "状态迁移被中断，恢复到终态");
            inner.state = self.fallback;
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessSupervisor {
    pub fn new(server: ManagedServer) -> Self {
        let parts = SupervisorParts::for_server(&server);
        Self::with_parts(server, parts)
    }

    pub fn with_parts(server: ManagedServer, parts: SupervisorParts) -> Self {
        Self {
            server,
            parts,
            inner: Mutex::new(Inner {
                state: SupervisorState::Stopped,
                confirmed: false,
                pid: None,
                last_started: None,
            }),
            schedule: None,
            arm_on_unconfirmed: false,
        }
    }

    /// 绑定定时备份，启动成功后启动，停止时停止
    pub fn with_schedule(mut self, schedule: Arc<BackupSchedule>, arm_on_unconfirmed: bool) -> Self {
        self.schedule = Some(schedule);
        self.arm_on_unconfirmed = arm_on_unconfirmed;
        self
    }

    pub fn server(&self) -> &ManagedServer {
        &self.server
    }

    pub fn state(&self) -> SupervisorState {
        lock(&self.inner).state
    }

    pub fn last_started(&self) -> Option<DateTime<Local>> {
        lock(&self.inner).last_started
    }

    pub fn schedule(&self) -> Option<&Arc<BackupSchedule>> {
        self.schedule.as_ref()
    }

    pub fn status(&self) -> SupervisorStatus {
        let inner = lock(&self.inner);
        SupervisorStatus {
            id: self.server.id.clone(),
            kind: self.server.kind.display_name().to_string(),
            state: inner.state,
            confirmed: inner.confirmed,
            pid: inner.pid,
            last_started: inner.last_started,
            backups_armed: self.schedule.as_ref().is_some_and(|s| s.is_armed()),
            last_backup: self.schedule.as_ref().and_then(|s| s.last_backup()),
        }
    }

    /// 进程表中是否能看到该服务器
    pub async fn probe_alive(&self) -> bool {
        self.parts.liveness.is_running().await
    }

    /// 通过控制通道执行单条管理命令
    #[instrument(skip(self), fields(server = %self.server.id))]
    pub async fn send_command(&self, command: &str) -> Result<String> {
        let reply = self.parts.control.send_command(command).await?;
        debug!(protocol = self.parts.control.protocol(), reply = %reply, "命令已执行");
        Ok(reply)
    }

    /// 停止状态下若进程表中已能看到服务器，则同步为运行中
    ///
    /// 用于新进程接手已在运行的服务器；不会启动定时备份。
    pub async fn adopt_running(&self) -> bool {
        if self.state() != SupervisorState::Stopped || !self.parts.liveness.is_running().await {
            return false;
        }

        let mut inner = lock(&self.inner);
        if inner.state != SupervisorState::Stopped {
            return false;
        }
        inner.state = SupervisorState::Running;
        inner.confirmed = true;
        info!(server = %self.server.id, "已接管正在运行的服务器");
        true
    }

    /// 启动服务器
    ///
    /// 调用方会被阻塞直到确认或预算耗尽（默认 18 × 5 秒）。
    #[instrument(skip(self), fields(server = %self.server.id))]
    pub async fn start(&self) -> Result<StartOutcome> {
        {
            let mut inner = lock(&self.inner);
            if inner.state != SupervisorState::Stopped {
                info!(state = ?inner.state, "服务器不在停止状态，忽略启动请求");
                return Ok(StartOutcome::AlreadyRunning);
            }
            inner.state = SupervisorState::Starting;
        }
        let mut guard = TransitionGuard::new(&self.inner, SupervisorState::Stopped);

        if self.parts.liveness.is_running().await {
            info!("检测到服务器已在运行，直接接管");
            {
                let mut inner = lock(&self.inner);
                inner.confirmed = true;
                inner.pid = None;
            }
            guard.finish(SupervisorState::Running);
            self.arm_backups();
            return Ok(StartOutcome::Adopted);
        }

        let pid = match self.parts.launcher.launch(&self.server) {
            Ok(pid) => pid,
            Err(e) => {
                error!(error = %e, "启动服务器进程失败");
                guard.finish(SupervisorState::Stopped);
                return Err(e.into());
            }
        };

        // 进程已经存在，中断后应允许后续 stop 处理它
        guard.fallback = SupervisorState::Running;
        {
            let mut inner = lock(&self.inner);
            inner.pid = pid;
            inner.confirmed = false;
            inner.last_started = Some(Local::now());
        }
        info!(pid = ?pid, "服务器进程已启动，等待确认");

        let confirmed = self.wait_until_ready().await;
        lock(&self.inner).confirmed = confirmed;
        guard.finish(SupervisorState::Running);

        if confirmed {
            self.arm_backups();
            Ok(StartOutcome::Started { pid })
        } else {
            let attempts = self.server.poll.start_attempts;
            warn!(attempts, "启动未确认，进程保持运行");
            if self.arm_on_unconfirmed {
                warn!("启动未确认，按配置仍然启动定时备份");
                self.arm_backups();
            } else {
                warn!("启动未确认，按配置不启动定时备份");
            }
            Ok(StartOutcome::Unconfirmed { attempts })
        }
    }

    /// 停止服务器
    ///
    /// 先通过控制通道请求正常关闭；等待期内进程没有退出则发送终止信号。
    #[instrument(skip(self), fields(server = %self.server.id))]
    pub async fn stop(&self) -> Result<StopOutcome> {
        {
            let mut inner = lock(&self.inner);
            match inner.state {
                SupervisorState::Stopped => {
                    info!("服务器未在运行，忽略停止请求");
                    return Ok(StopOutcome::NotRunning);
                }
                SupervisorState::Starting | SupervisorState::Stopping => {
                    info!(state = ?inner.state, "服务器正在迁移状态，忽略停止请求");
                    return Ok(StopOutcome::InTransition);
                }
                SupervisorState::Running => inner.state = SupervisorState::Stopping,
            }
        }
        let guard = TransitionGuard::new(&self.inner, SupervisorState::Running);

        // 正在进行的备份不会被取消
        if let Some(schedule) = &self.schedule {
            schedule.disarm();
        }

        let control = &self.parts.control;
        let channel_error = match control.send_shutdown(Some(SHUTDOWN_ANNOUNCEMENT)).await {
            Ok(()) => {
                info!(protocol = control.protocol(), "已发送关闭指令");
                None
            }
            Err(e) => {
                warn!(protocol = control.protocol(), error = %e, "控制通道失败，等待后将强制终止");
                Some(e.to_string())
            }
        };

        let outcome = if self.wait_until_gone().await {
            info!("服务器已正常关闭");
            StopOutcome::Stopped
        } else {
            let reason = match channel_error {
                Some(e) => EscalationReason::ControlChannel(e),
                None => EscalationReason::StillRunning,
            };
            self.escalate(reason).await
        };

        {
            let mut inner = lock(&self.inner);
            inner.pid = None;
            inner.confirmed = false;
        }
        guard.finish(SupervisorState::Stopped);
        Ok(outcome)
    }

    fn arm_backups(&self) {
        if let Some(schedule) = &self.schedule {
            schedule.arm();
        }
    }

    /// 先探测再等待，共探测 `start_attempts` 次
    async fn wait_until_ready(&self) -> bool {
        let poll = self.server.poll;
        for attempt in 1..=poll.start_attempts {
            if attempt > 1 {
                sleep(poll.start_interval).await;
            }
            if self.parts.readiness.is_running().await {
                info!(attempt, "服务器已确认运行");
                return true;
            }
            debug!(attempt, max = poll.start_attempts, "服务器尚未就绪");
        }
        false
    }

    async fn wait_until_gone(&self) -> bool {
        let poll = self.server.poll;
        for attempt in 1..=poll.stop_attempts {
            sleep(poll.stop_interval).await;
            if !self.parts.liveness.is_running().await {
                return true;
            }
            debug!(attempt, max = poll.stop_attempts, "等待服务器退出...");
        }
        false
    }

    async fn target_pids(&self) -> Vec<u32> {
        let mut pids = self.parts.liveness.matching_pids().await;
        if let Some(pid) = lock(&self.inner).pid {
            pids.push(pid);
        }
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    async fn escalate(&self, reason: EscalationReason) -> StopOutcome {
        warn!(%reason, "升级为强制终止");

        let pids = self.target_pids().await;
        for pid in &pids {
            let delivered = self.parts.launcher.signal(*pid, StopSignal::Terminate);
            debug!(pid, delivered, "已发送终止信号");
        }

        let deadline = Instant::now() + self.server.poll.terminate_timeout;
        let check = Duration::from_millis(TERMINATE_CHECK_INTERVAL_MS);
        loop {
            if !self.parts.liveness.is_running().await {
                info!(%reason, "服务器已被强制终止");
                return StopOutcome::Terminated { reason };
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(check.min(deadline - now)).await;
        }

        let mut pids = pids;
        pids.extend(self.parts.liveness.matching_pids().await);
        pids.sort_unstable();
        pids.dedup();
        for pid in &pids {
            self.parts.launcher.signal(*pid, StopSignal::Kill);
        }
        error!(%reason, pids = ?pids, "终止等待超时，已发送 SIGKILL，需人工确认");
        StopOutcome::Unconfirmed { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ServerKind};
    use crate::error::{ControlChannelError, LaunchError, WardenError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

    /// 可编程的探测：在第 N 次调用后翻转结果
    #[derive(Default)]
    struct FakeProbe {
        alive: AtomicBool,
        calls: AtomicU32,
        /// 调用次数达到该值时变为存活
        up_after: Option<u32>,
        pids: Vec<u32>,
    }

    impl FakeProbe {
        fn dead() -> Self {
            Self::default()
        }

        fn alive() -> Self {
            let probe = Self::default();
            probe.alive.store(true, Ordering::SeqCst);
            probe
        }

        fn up_after(calls: u32) -> Self {
            Self {
                up_after: Some(calls),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ProcessProbe for FakeProbe {
        async fn is_running(&self) -> bool {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.up_after.is_some_and(|limit| n >= limit) {
                self.alive.store(true, Ordering::SeqCst);
            }
            self.alive.load(Ordering::SeqCst)
        }

        async fn matching_pids(&self) -> Vec<u32> {
            self.pids.clone()
        }
    }

    #[derive(Default)]
    struct FakeControl {
        fail: bool,
        shutdowns: AtomicUsize,
        /// 收到关闭指令后把该探测置为停止
        kills: Option<Arc<FakeProbe>>,
    }

    #[async_trait]
    impl ControlChannel for FakeControl {
        fn protocol(&self) -> &'static str {
            "fake"
        }

        async fn send_command(&self, _command: &str) -> std::result::Result<String, ControlChannelError> {
            Ok(String::new())
        }

        async fn send_shutdown(
            &self,
            announce: Option<&str>,
        ) -> std::result::Result<(), ControlChannelError> {
            assert_eq!(announce, Some(SHUTDOWN_ANNOUNCEMENT));
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ControlChannelError::Protocol("boom".into()));
            }
            if let Some(probe) = &self.kills {
                probe.alive.store(false, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        fail: bool,
        launches: AtomicUsize,
        signals: Mutex<Vec<(u32, StopSignal)>>,
        /// 收到 SIGTERM 后把该探测置为停止
        terminates: Option<Arc<FakeProbe>>,
    }

    impl ProcessLauncher for FakeLauncher {
        fn launch(&self, _server: &ManagedServer) -> std::result::Result<Option<u32>, LaunchError> {
            if self.fail {
                return Err(LaunchError::EmptyCommand);
            }
            self.launches.fetch_add(1, Ordering::SeqCst);
            Ok(Some(4242))
        }

        fn signal(&self, pid: u32, signal: StopSignal) -> bool {
            self.signals.lock().unwrap().push((pid, signal));
            if signal == StopSignal::Terminate {
                if let Some(probe) = &self.terminates {
                    probe.alive.store(false, Ordering::SeqCst);
                }
            }
            true
        }
    }

    fn server() -> ManagedServer {
        let config = AppConfig::from_toml_str(&AppConfig::template()).unwrap();
        let server = ManagedServer::from(config.server("minecraft").unwrap());
        assert_eq!(server.kind, ServerKind::Minecraft);
        server
    }

    fn supervisor(
        liveness: Arc<FakeProbe>,
        readiness: Arc<FakeProbe>,
        control: Arc<FakeControl>,
        launcher: Arc<FakeLauncher>,
    ) -> ProcessSupervisor {
        ProcessSupervisor::with_parts(
            server(),
            SupervisorParts {
                liveness,
                readiness,
                control,
                launcher,
            },
        )
    }

    /// 手动把状态置为运行中，模拟一次已确认的启动
    fn force_running(sup: &ProcessSupervisor) {
        let mut inner = lock(&sup.inner);
        inner.state = SupervisorState::Running;
        inner.confirmed = true;
        inner.pid = Some(4242);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_is_rejected() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::up_after(2)),
            Arc::new(FakeControl::default()),
            launcher.clone(),
        );

        assert_eq!(sup.start().await.unwrap(), StartOutcome::Started { pid: Some(4242) });
        assert_eq!(sup.start().await.unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(sup.state(), SupervisorState::Running);
        assert!(sup.last_started().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_launches_once() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = Arc::new(supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::up_after(3)),
            Arc::new(FakeControl::default()),
            launcher.clone(),
        ));

        let first = tokio::spawn({
            let sup = sup.clone();
            async move { sup.start().await.unwrap() }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sup.state(), SupervisorState::Starting);
        assert_eq!(sup.start().await.unwrap(), StartOutcome::AlreadyRunning);
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::InTransition);

        assert!(first.await.unwrap().is_confirmed());
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_before_budget_exhausted() {
        let readiness = Arc::new(FakeProbe::up_after(4));
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            readiness.clone(),
            Arc::new(FakeControl::default()),
            Arc::new(FakeLauncher::default()),
        );

        let began = Instant::now();
        let outcome = sup.start().await.unwrap();
        assert!(outcome.is_confirmed());
        assert_eq!(readiness.calls.load(Ordering::SeqCst), 4);
        // 第一次探测不等待，之后每次间隔 5 秒
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_secs(15) && elapsed < Duration::from_secs(16));
        assert_eq!(sup.state(), SupervisorState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_after_exact_attempts() {
        let readiness = Arc::new(FakeProbe::dead());
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            readiness.clone(),
            Arc::new(FakeControl::default()),
            Arc::new(FakeLauncher::default()),
        );

        let began = Instant::now();
        let outcome = sup.start().await.unwrap();
        assert_eq!(outcome, StartOutcome::Unconfirmed { attempts: 18 });
        assert_eq!(readiness.calls.load(Ordering::SeqCst), 18);
        // 18 次探测之间共 17 个间隔
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_secs(85) && elapsed < Duration::from_secs(86));
        // 未确认时仍保持 Running，后续 stop 可以处理
        assert_eq!(sup.state(), SupervisorState::Running);
        assert!(!sup.status().confirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_server_is_adopted() {
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(
            Arc::new(FakeProbe::alive()),
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeControl::default()),
            launcher.clone(),
        );

        assert_eq!(sup.start().await.unwrap(), StartOutcome::Adopted);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 0);
        assert_eq!(sup.state(), SupervisorState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_error_returns_to_stopped() {
        let launcher = Arc::new(FakeLauncher {
            fail: true,
            ..FakeLauncher::default()
        });
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeControl::default()),
            launcher,
        );

        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, WardenError::Launch(LaunchError::EmptyCommand)));
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_stopped_leaves_channel_alone() {
        let control = Arc::new(FakeControl::default());
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::dead()),
            control.clone(),
            Arc::new(FakeLauncher::default()),
        );

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::NotRunning);
        assert_eq!(control.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_stop() {
        let liveness = Arc::new(FakeProbe::alive());
        let control = Arc::new(FakeControl {
            kills: Some(liveness.clone()),
            ..FakeControl::default()
        });
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(
            liveness,
            Arc::new(FakeProbe::dead()),
            control.clone(),
            launcher.clone(),
        );
        force_running(&sup);

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Stopped);
        assert_eq!(control.shutdowns.load(Ordering::SeqCst), 1);
        assert!(launcher.signals.lock().unwrap().is_empty());
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_escalates_when_process_lingers() {
        let liveness = Arc::new(FakeProbe {
            pids: vec![77],
            ..FakeProbe::alive()
        });
        let launcher = Arc::new(FakeLauncher {
            terminates: Some(liveness.clone()),
            ..FakeLauncher::default()
        });
        let sup = supervisor(
            liveness.clone(),
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeControl::default()),
            launcher.clone(),
        );
        force_running(&sup);

        let outcome = sup.stop().await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Terminated {
                reason: EscalationReason::StillRunning
            }
        );
        assert!(outcome.is_escalated());
        // 12 次关闭等待 + 1 次终止后确认
        assert_eq!(liveness.calls.load(Ordering::SeqCst), 13);
        assert_eq!(
            *launcher.signals.lock().unwrap(),
            vec![(77, StopSignal::Terminate), (4242, StopSignal::Terminate)]
        );
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_failure_without_lingering_process_is_clean() {
        // 关闭指令发送失败，但进程已经自行退出
        let liveness = Arc::new(FakeProbe::dead());
        let control = Arc::new(FakeControl {
            fail: true,
            ..FakeControl::default()
        });
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(
            liveness,
            Arc::new(FakeProbe::dead()),
            control,
            launcher.clone(),
        );
        force_running(&sup);

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Stopped);
        assert!(launcher.signals.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unkillable_process_gets_sigkill() {
        let liveness = Arc::new(FakeProbe::alive());
        let control = Arc::new(FakeControl {
            fail: true,
            ..FakeControl::default()
        });
        let launcher = Arc::new(FakeLauncher::default());
        let sup = supervisor(
            liveness,
            Arc::new(FakeProbe::dead()),
            control,
            launcher.clone(),
        );
        force_running(&sup);

        let began = Instant::now();
        let outcome = sup.stop().await.unwrap();
        assert!(matches!(
            outcome,
            StopOutcome::Unconfirmed {
                reason: EscalationReason::ControlChannel(_)
            }
        ));
        // 12 × 5 秒关闭等待 + 10 秒终止等待
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_secs(70) && elapsed < Duration::from_secs(71));
        assert_eq!(
            *launcher.signals.lock().unwrap(),
            vec![(4242, StopSignal::Terminate), (4242, StopSignal::Kill)]
        );
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_start_restores_state() {
        let sup = Arc::new(supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeControl::default()),
            Arc::new(FakeLauncher::default()),
        ));

        let task = tokio::spawn({
            let sup = sup.clone();
            async move { sup.start().await }
        });
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(sup.state(), SupervisorState::Starting);

        task.abort();
        let _ = task.await;
        // 进程已启动，恢复为 Running 以便 stop 处理
        assert_eq!(sup.state(), SupervisorState::Running);
    }

    fn schedule() -> Arc<BackupSchedule> {
        use crate::backup::{BackupManager, RetentionPolicy, ScheduleConfig};
        Arc::new(BackupSchedule::new(
            "minecraft",
            Arc::new(BackupManager::new("/tmp/warden-unused")),
            ScheduleConfig {
                interval: Duration::from_secs(3600),
                initial_delay: Duration::from_secs(10),
                retention: RetentionPolicy::from_hours(36),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_backups_follow_lifecycle() {
        let liveness = Arc::new(FakeProbe::dead());
        let control = Arc::new(FakeControl::default());
        let backups = schedule();
        let sup = supervisor(
            liveness,
            Arc::new(FakeProbe::up_after(1)),
            control,
            Arc::new(FakeLauncher::default()),
        )
        .with_schedule(backups.clone(), false);

        assert!(sup.start().await.unwrap().is_confirmed());
        assert!(backups.is_armed());
        assert!(sup.status().backups_armed);

        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Stopped);
        assert!(!backups.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_start_does_not_arm_by_default() {
        let unarmed = schedule();
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeControl::default()),
            Arc::new(FakeLauncher::default()),
        )
        .with_schedule(unarmed.clone(), false);
        sup.start().await.unwrap();
        assert!(!unarmed.is_armed());

        let armed = schedule();
        let sup = supervisor(
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeProbe::dead()),
            Arc::new(FakeControl::default()),
            Arc::new(FakeLauncher::default()),
        )
        .with_schedule(armed.clone(), true);
        sup.start().await.unwrap();
        assert!(armed.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_adopt_running_then_stop() {
        let liveness = Arc::new(FakeProbe::alive());
        let control = Arc::new(FakeControl {
            kills: Some(liveness.clone()),
            ..FakeControl::default()
        });
        let sup = supervisor(
            liveness,
            Arc::new(FakeProbe::dead()),
            control.clone(),
            Arc::new(FakeLauncher::default()),
        );

        assert!(sup.adopt_running().await);
        assert!(!sup.adopt_running().await);
        assert_eq!(sup.state(), SupervisorState::Running);
        assert_eq!(sup.stop().await.unwrap(), StopOutcome::Stopped);
        assert_eq!(control.shutdowns.load(Ordering::SeqCst), 1);
    }
}
