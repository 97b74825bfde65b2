//! 控制通道：通过服务器原生文本协议发送管理命令
//!
//! Minecraft 使用 RCON，7 Days to Die 使用 telnet 控制台。两者都实现
//! [`ControlChannel`]，每次调用都是一次短连接会话，每个 IO 步骤都有超时。

mod rcon;
mod telnet;

pub use rcon::RconChannel;
pub use telnet::TelnetChannel;

use crate::config::ServerKind;
use crate::error::ControlChannelError;
use crate::server::ManagedServer;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// 协议名称，用于日志
    fn protocol(&self) -> &'static str;

    /// 发送单条命令并返回服务器的响应文本
    async fn send_command(&self, command: &str) -> Result<String, ControlChannelError>;

    /// 广播可选的提示消息，然后请求服务器正常关闭
    async fn send_shutdown(&self, announce: Option<&str>) -> Result<(), ControlChannelError>;
}

/// 根据服务器种类创建对应的控制通道
pub fn for_server(server: &ManagedServer) -> Arc<dyn ControlChannel> {
    let endpoint = &server.control;
    let timeout = server.poll.io_timeout;

    match server.kind {
        ServerKind::Minecraft => Arc::new(RconChannel::new(
            endpoint.host.clone(),
            endpoint.port,
            endpoint.password.clone(),
            timeout,
        )),
        ServerKind::SevenDays => Arc::new(TelnetChannel::new(
            endpoint.host.clone(),
            endpoint.port,
            endpoint.password.clone(),
            timeout,
        )),
    }
}

/// 给单个 IO 步骤加上超时
pub(crate) async fn step<T, F>(
    step: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, ControlChannelError>
where
    F: Future<Output = Result<T, ControlChannelError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| ControlChannelError::Timeout {
            step,
            timeout_secs: timeout.as_secs(),
        })?
}
