use super::{ControlChannel, step};
use crate::constants::control::RCON_MAX_PACKET_LEN;
use crate::error::ControlChannelError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

const TYPE_RESPONSE_VALUE: i32 = 0;
const TYPE_EXEC_COMMAND: i32 = 2;
const TYPE_AUTH_RESPONSE: i32 = 2;
const TYPE_AUTH: i32 = 3;

/// 认证失败时服务器回复的请求 ID
const AUTH_FAILED_ID: i32 = -1;

/// Minecraft RCON 控制通道
pub struct RconChannel {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
    next_id: AtomicI32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RconPacket {
    pub id: i32,
    pub kind: i32,
    pub body: String,
}

impl RconPacket {
    pub(crate) fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let len = (4 + 4 + body.len() + 2) as i32;
        let mut out = Vec::with_capacity(len as usize + 4);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&self.id.to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(&[0, 0]);
        out
    }

    pub(crate) async fn read_from(stream: &mut TcpStream) -> Result<Self, ControlChannelError> {
        let len = stream.read_i32_le().await?;
        if !(10..=RCON_MAX_PACKET_LEN).contains(&len) {
            return Err(ControlChannelError::Protocol(format!(
                "RCON 包长度无效: {len}"
            )));
        }

        let mut buf = vec![0u8; len as usize];
        stream.read_exact(&mut buf).await?;

        let id = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let kind = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let body_end = buf.len() - 2;
        let body = String::from_utf8_lossy(&buf[8..body_end]).to_string();

        Ok(Self { id, kind, body })
    }
}

impl RconChannel {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            timeout,
            next_id: AtomicI32::new(1),
        }
    }

    fn next_id(&self) -> i32 {
        // 保持为正数，-1 保留给认证失败
        self.next_id.fetch_add(1, Ordering::Relaxed).rem_euclid(i32::MAX - 1) + 1
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 建立连接并完成认证
    async fn open_session(&self) -> Result<TcpStream, ControlChannelError> {
        let addr = self.addr();
        let mut stream = step("RCON 连接", self.timeout, async {
            TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(|source| ControlChannelError::Connect {
                    addr: addr.clone(),
                    source,
                })
        })
        .await?;

        let auth_id = self.next_id();
        let login = RconPacket {
            id: auth_id,
            kind: TYPE_AUTH,
            body: self.password.clone(),
        };
        step("RCON 发送认证", self.timeout, async {
            stream.write_all(&login.encode()).await?;
            Ok::<(), ControlChannelError>(())
        })
        .await?;

        // 部分服务器会先回一个空的 RESPONSE_VALUE 包，再回认证结果
        loop {
            let reply = step("RCON 等待认证", self.timeout, RconPacket::read_from(&mut stream))
                .await?;
            if reply.id == AUTH_FAILED_ID {
                return Err(ControlChannelError::AuthRejected(format!(
                    "RCON {addr} 拒绝了密码"
                )));
            }
            if reply.kind == TYPE_AUTH_RESPONSE && reply.id == auth_id {
                debug!(addr = %addr, "RCON 认证成功");
                return Ok(stream);
            }
            if reply.kind != TYPE_RESPONSE_VALUE {
                return Err(ControlChannelError::Protocol(format!(
                    "意外的认证回复类型: {}",
                    reply.kind
                )));
            }
        }
    }

    async fn exec(
        &self,
        stream: &mut TcpStream,
        command: &str,
    ) -> Result<String, ControlChannelError> {
        let id = self.next_id();
        let packet = RconPacket {
            id,
            kind: TYPE_EXEC_COMMAND,
            body: command.to_string(),
        };
        step("RCON 发送命令", self.timeout, async {
            stream.write_all(&packet.encode()).await?;
            Ok::<(), ControlChannelError>(())
        })
        .await?;

        let reply = step("RCON 等待响应", self.timeout, RconPacket::read_from(stream)).await?;
        if reply.id != id {
            return Err(ControlChannelError::Protocol(format!(
                "响应 ID 不匹配: 期望 {id}, 实际 {}",
                reply.id
            )));
        }
        Ok(reply.body)
    }
}

#[async_trait]
impl ControlChannel for RconChannel {
    fn protocol(&self) -> &'static str {
        "rcon"
    }

    async fn send_command(&self, command: &str) -> Result<String, ControlChannelError> {
        let mut stream = self.open_session().await?;
        let reply = self.exec(&mut stream, command).await?;
        let _ = stream.shutdown().await;
        Ok(reply)
    }

    #[instrument(skip(self), fields(addr = %self.addr()))]
    async fn send_shutdown(&self, announce: Option<&str>) -> Result<(), ControlChannelError> {
        let mut stream = self.open_session().await?;

        if let Some(message) = announce {
            self.exec(&mut stream, &format!("say {message}")).await?;
        }

        // 服务器可能在回复 stop 之前就断开连接，命令已送达即视为成功
        match self.exec(&mut stream, "stop").await {
            Ok(reply) => debug!(reply = %reply, "RCON stop 已确认"),
            Err(ControlChannelError::Io(e)) => debug!(error = %e, "RCON stop 后连接已关闭"),
            Err(ControlChannelError::Timeout { .. }) => debug!("RCON stop 未收到响应"),
            Err(e) => return Err(e),
        }

        info!("已通过 RCON 发送 stop 指令");
        let _ = stream.shutdown().await;
        Ok(())
    }
}
