use crate::backup::{
    BackupManager, BackupOutcome, BackupSchedule, DirectoryBackupHandler, ScheduleConfig,
};
use crate::config::{AppConfig, ServerKind};
use crate::error::{Result, WardenError};
use crate::probe::{ServerListStatus, StatusQueryProbe};
use crate::server::ManagedServer;
use crate::supervisor::{ProcessSupervisor, StartOutcome, StopOutcome, SupervisorStatus};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// `status` 的完整报告
#[derive(Debug, Clone, Serialize)]
pub struct ServerReport {
    #[serde(flatten)]
    pub status: SupervisorStatus,
    /// 进程表中是否能看到服务器
    pub alive: bool,
    pub last_backup_path: Option<PathBuf>,
    /// Minecraft 服务器列表查询结果
    pub players: Option<ServerListStatus>,
}

/// 按服务器 ID 管理全部守护进程与备份
pub struct ServerRegistry {
    manager: Arc<BackupManager>,
    supervisors: Vec<Arc<ProcessSupervisor>>,
}

impl ServerRegistry {
    /// 根据配置构建所有组件
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let servers: Vec<ManagedServer> = config.servers.iter().map(ManagedServer::from).collect();

        let mut manager = BackupManager::new(&config.backup.root);
        for server in &servers {
            manager.register(Arc::new(DirectoryBackupHandler::for_server(
                server,
                &config.backup.root,
            )));
        }
        manager.sweep_staging();
        let manager = Arc::new(manager);

        let schedule_config = ScheduleConfig::from(&config.backup);
        let supervisors = servers
            .into_iter()
            .map(|server| {
                let schedule = Arc::new(BackupSchedule::new(
                    server.id.clone(),
                    manager.clone(),
                    schedule_config,
                ));
                Arc::new(
                    ProcessSupervisor::new(server)
                        .with_schedule(schedule, config.backup.arm_on_unconfirmed_start),
                )
            })
            .collect();

        Ok(Self {
            manager,
            supervisors,
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        self.supervisors
            .iter()
            .map(|s| s.server().id.as_str())
            .collect()
    }

    pub fn supervisor(&self, id: &str) -> Result<&Arc<ProcessSupervisor>> {
        self.supervisors
            .iter()
            .find(|s| s.server().id == id)
            .ok_or_else(|| WardenError::UnknownServer(id.to_string()))
    }

    pub async fn start(&self, id: &str) -> Result<StartOutcome> {
        self.supervisor(id)?.start().await
    }

    pub async fn stop(&self, id: &str) -> Result<StopOutcome> {
        self.supervisor(id)?.stop().await
    }

    /// 向服务器控制台发送一条命令
    pub async fn send_command(&self, id: &str, command: &str) -> Result<String> {
        self.supervisor(id)?.send_command(command).await
    }

    pub async fn status(&self, id: &str) -> Result<ServerReport> {
        let supervisor = self.supervisor(id)?;
        Ok(self.report(supervisor).await)
    }

    pub async fn status_all(&self) -> Vec<ServerReport> {
        let mut reports = Vec::with_capacity(self.supervisors.len());
        for supervisor in &self.supervisors {
            reports.push(self.report(supervisor).await);
        }
        reports
    }

    pub fn last_started(&self, id: &str) -> Result<Option<DateTime<Local>>> {
        Ok(self.supervisor(id)?.last_started())
    }

    pub fn last_backup_path(&self, id: &str) -> Result<Option<PathBuf>> {
        self.supervisor(id)?;
        Ok(self.manager.latest_backup(id))
    }

    /// 立即备份；不指定服务器时备份全部
    pub async fn backup_now(&self, id: Option<&str>) -> Result<Vec<BackupOutcome>> {
        match id {
            Some(id) => {
                let supervisor = self.supervisor(id)?;
                match supervisor.schedule() {
                    Some(schedule) => Ok(schedule.run_once().await),
                    None => Ok(self.manager.run_for(id).await),
                }
            }
            None => {
                let outcomes = self.manager.run_all().await;
                for supervisor in &self.supervisors {
                    if let Some(schedule) = supervisor.schedule() {
                        schedule.record(&outcomes).await;
                    }
                }
                Ok(outcomes)
            }
        }
    }

    /// 并行启动所有标记为自动启动的服务器
    pub async fn autostart(&self) -> Vec<(String, Result<StartOutcome>)> {
        let mut tasks = JoinSet::new();
        for supervisor in self.supervisors.iter().filter(|s| s.server().autostart) {
            let supervisor = supervisor.clone();
            info!(server = %supervisor.server().id, "自动启动服务器");
            tasks.spawn(async move {
                let id = supervisor.server().id.clone();
                (id, supervisor.start().await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "自动启动任务异常"),
            }
        }
        results
    }

    /// 停止所有定时备份，服务器进程保持运行
    pub fn disarm_all(&self) {
        for supervisor in &self.supervisors {
            if let Some(schedule) = supervisor.schedule() {
                schedule.disarm();
            }
        }
    }

    async fn report(&self, supervisor: &ProcessSupervisor) -> ServerReport {
        let server = supervisor.server();
        let alive = supervisor.probe_alive().await;

        let players = match (server.kind, server.control.status_port) {
            (ServerKind::Minecraft, Some(port)) if alive => {
                StatusQueryProbe::new(server.control.host.clone(), port, server.poll.io_timeout)
                    .query()
                    .await
                    .ok()
            }
            _ => None,
        };

        ServerReport {
            status: supervisor.status(),
            alive,
            last_backup_path: self.manager.latest_backup(&server.id),
            players,
        }
    }
}
