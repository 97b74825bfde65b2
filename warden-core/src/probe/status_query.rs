use super::ProcessProbe;
use crate::error::ProbeInconclusive;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// 握手中声明的协议版本，-1 表示仅查询状态
const STATUS_PROTOCOL_VERSION: i32 = -1;

/// 握手后进入状态查询阶段
const NEXT_STATE_STATUS: i32 = 1;

/// 状态响应 JSON 的长度上限
const MAX_STATUS_LEN: i32 = 64 * 1024;

/// 服务器列表查询的结果摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerListStatus {
    pub version: Option<String>,
    pub players_online: Option<u64>,
    pub players_max: Option<u64>,
}

/// Minecraft 服务器列表查询探测
///
/// 连接被拒绝或超时都表示"尚未确认运行"，因为服务器可能还没开始接受连接。
#[derive(Debug, Clone)]
pub struct StatusQueryProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl StatusQueryProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// 执行一次完整的状态查询
    pub async fn query(&self) -> Result<ServerListStatus, ProbeInconclusive> {
        tokio::time::timeout(self.timeout, self.query_inner())
            .await
            .map_err(|_| ProbeInconclusive::Timeout(self.timeout.as_secs()))?
    }

    async fn query_inner(&self) -> Result<ServerListStatus, ProbeInconclusive> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        // 握手包
        let mut handshake = Vec::new();
        write_varint(&mut handshake, 0x00);
        write_varint(&mut handshake, STATUS_PROTOCOL_VERSION);
        write_string(&mut handshake, &self.host);
        handshake.extend_from_slice(&self.port.to_be_bytes());
        write_varint(&mut handshake, NEXT_STATE_STATUS);
        stream.write_all(&frame(&handshake)).await?;

        // 状态请求包
        stream.write_all(&frame(&[0x00])).await?;
        stream.flush().await?;

        let _packet_len = read_varint(&mut stream).await?;
        let packet_id = read_varint(&mut stream).await?;
        if packet_id != 0x00 {
            return Err(ProbeInconclusive::InvalidReply(format!(
                "意外的包 ID: {packet_id}"
            )));
        }

        let json_len = read_varint(&mut stream).await?;
        if !(0..=MAX_STATUS_LEN).contains(&json_len) {
            return Err(ProbeInconclusive::InvalidReply(format!(
                "状态长度无效: {json_len}"
            )));
        }

        let mut body = vec![0u8; json_len as usize];
        stream.read_exact(&mut body).await?;

        parse_status(&body)
    }
}

#[async_trait]
impl ProcessProbe for StatusQueryProbe {
    async fn is_running(&self) -> bool {
        match self.query().await {
            Ok(status) => {
                debug!(host = %self.host, port = self.port, ?status, "状态查询成功");
                true
            }
            Err(e) => {
                debug!(host = %self.host, port = self.port, error = %e, "状态查询未确认");
                false
            }
        }
    }
}

fn parse_status(body: &[u8]) -> Result<ServerListStatus, ProbeInconclusive> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ProbeInconclusive::InvalidReply(e.to_string()))?;

    if !value.is_object() {
        return Err(ProbeInconclusive::InvalidReply(
            "状态响应不是 JSON 对象".to_string(),
        ));
    }

    Ok(ServerListStatus {
        version: value
            .pointer("/version/name")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        players_online: value.pointer("/players/online").and_then(|v| v.as_u64()),
        players_max: value.pointer("/players/max").and_then(|v| v.as_u64()),
    })
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut out, payload.len() as i32);
    out.extend_from_slice(payload);
    out
}

fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

pub(crate) async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<i32> {
    let mut result: u32 = 0;
    for shift in 0..5 {
        let byte = reader.read_u8().await?;
        result |= ((byte & 0x7F) as u32) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "VarInt 过长",
    ))
}
