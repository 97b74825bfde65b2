use super::{ControlChannel, step};
use crate::constants::control::{TELNET_LOGIN_ACK, TELNET_LOGIN_REJECTED, TELNET_PASSWORD_PROMPT};
use crate::error::ControlChannelError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

/// 命令发出后收集输出的时间窗口上限
const OUTPUT_WINDOW: Duration = Duration::from_millis(800);

/// 7 Days to Die telnet 控制台通道
pub struct TelnetChannel {
    host: String,
    port: u16,
    password: String,
    timeout: Duration,
}

/// 一次已登录的 telnet 会话
struct TelnetSession {
    stream: TcpStream,
    buffer: Vec<u8>,
    timeout: Duration,
}

impl TelnetSession {
    /// 读取直到出现任一标记，返回命中的标记下标
    async fn read_until(
        &mut self,
        what: &'static str,
        markers: &[&str],
    ) -> Result<usize, ControlChannelError> {
        let timeout = self.timeout;
        step(what, timeout, async {
            let mut chunk = [0u8; 1024];
            loop {
                let hit = {
                    let text = String::from_utf8_lossy(&self.buffer);
                    markers.iter().position(|m| text.contains(m))
                };
                if let Some(index) = hit {
                    self.buffer.clear();
                    return Ok(index);
                }

                let n = match self.stream.read(&mut chunk).await {
                    Ok(n) => n,
                    Err(e) => return Err(ControlChannelError::Io(e)),
                };
                if n == 0 {
                    return Err(ControlChannelError::Protocol(format!(
                        "{what}: 连接被对端关闭"
                    )));
                }
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        })
        .await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ControlChannelError> {
        let timeout = self.timeout;
        step("telnet 写入", timeout, async {
            self.stream.write_all(line.as_bytes()).await?;
            self.stream.write_all(b"\r\n").await?;
            self.stream.flush().await?;
            Ok::<(), ControlChannelError>(())
        })
        .await
    }

    /// 在短时间窗口内收集服务器输出
    async fn collect_output(&mut self) -> String {
        let window = OUTPUT_WINDOW.min(self.timeout);
        let deadline = tokio::time::Instant::now() + window;
        let mut chunk = [0u8; 1024];

        while let Ok(Ok(n)) = tokio::time::timeout_at(deadline, self.stream.read(&mut chunk)).await
        {
            if n == 0 {
                break;
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }

        let text = String::from_utf8_lossy(&self.buffer).trim().to_string();
        self.buffer.clear();
        text
    }

    async fn close(mut self) {
        let _ = self.write_line("exit").await;
        let _ = self.stream.shutdown().await;
    }
}

impl TelnetChannel {
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
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 连接并完成密码握手
    async fn login(&self) -> Result<TelnetSession, ControlChannelError> {
        let addr = self.addr();
        let stream = step("telnet 连接", self.timeout, async {
            TcpStream::connect((self.host.as_str(), self.port))
                .await
                .map_err(|source| ControlChannelError::Connect {
                    addr: addr.clone(),
                    source,
                })
        })
        .await?;

        let mut session = TelnetSession {
            stream,
            buffer: Vec::new(),
            timeout: self.timeout,
        };

        session
            .read_until("telnet 等待密码提示", &[TELNET_PASSWORD_PROMPT])
            .await?;
        session.write_line(&self.password).await?;

        let outcome = session
            .read_until(
                "telnet 等待登录结果",
                &[TELNET_LOGIN_ACK, TELNET_LOGIN_REJECTED],
            )
            .await?;
        if outcome == 1 {
            return Err(ControlChannelError::AuthRejected(format!(
                "telnet {addr} 拒绝了密码"
            )));
        }

        debug!(addr = %addr, "telnet 登录成功");
        Ok(session)
    }
}

#[async_trait]
impl ControlChannel for TelnetChannel {
    fn protocol(&self) -> &'static str {
        "telnet"
    }

    async fn send_command(&self, command: &str) -> Result<String, ControlChannelError> {
        let mut session = self.login().await?;
        session.write_line(command).await?;
        let output = session.collect_output().await;
        session.close().await;
        Ok(output)
    }

    #[instrument(skip(self), fields(addr = %self.addr()))]
    async fn send_shutdown(&self, announce: Option<&str>) -> Result<(), ControlChannelError> {
        let mut session = self.login().await?;

        if let Some(message) = announce {
            let escaped = message.replace('"', "'");
            session.write_line(&format!("say \"{escaped}\"")).await?;
        }

        session.write_line("shutdown").await?;
        info!("已通过 telnet 发送 shutdown 指令");

        // 服务器收到 shutdown 后会自行断开，不再发送 exit
        let _ = session.stream.shutdown().await;
        Ok(())
    }
}
