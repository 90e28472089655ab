//! API 会话
//!
//! 在任意字节流（TCP 或 TLS）上实现"一问多答"的命令交换：
//! 每条命令附带 `.tag`，读取同 tag 的回复直到 `!done`。

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::{debug, warn};

use super::frame::{Record, ResultFrame};
use super::traits::{command_words, DeviceSession, Verb};
use super::word::{read_sentence, write_sentence};
use crate::error::DeviceError;

/// 一条命令的完整回复
#[derive(Debug, Default)]
pub struct Reply {
    pub records: Vec<Record>,
    /// `!done` 句子上的属性（如 `=ret=`）
    pub done: Record,
}

/// 基于字节流的 API 会话
pub struct ApiSession<S> {
    stream: BufStream<S>,
    next_tag: u64,
    timeout: Duration,
    closed: bool,
}

impl<S> ApiSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: BufStream::new(stream),
            next_tag: 1,
            timeout,
            closed: false,
        }
    }

    /// 明文登录（RouterOS 6.43+ 登录方式）
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), DeviceError> {
        let words = vec![
            "/login".to_string(),
            format!("=name={}", username),
            format!("=password={}", password),
        ];

        match self.execute(words).await {
            Ok(reply) => {
                if reply.done.get("ret").is_some() {
                    // 旧固件返回挑战值，不支持
                    return Err(DeviceError::Auth("设备仅支持旧版挑战登录".to_string()));
                }
                Ok(())
            }
            Err(DeviceError::Trap { message, .. }) | Err(DeviceError::NotFound(message)) => {
                Err(DeviceError::Auth(message))
            }
            Err(e) => Err(e),
        }
    }

    /// 执行一条命令（带超时）
    pub async fn execute(&mut self, words: Vec<String>) -> Result<Reply, DeviceError> {
        if self.closed {
            return Err(DeviceError::Connection("会话已关闭".to_string()));
        }

        match tokio::time::timeout(self.timeout, self.exchange(words)).await {
            Ok(result) => {
                if let Err(e) = &result {
                    if e.is_transport() {
                        self.closed = true;
                    }
                }
                result
            }
            Err(_) => {
                // 流上可能残留半个回复，会话不可再用
                self.closed = true;
                Err(DeviceError::Timeout(self.timeout.as_secs()))
            }
        }
    }

    async fn exchange(&mut self, mut words: Vec<String>) -> Result<Reply, DeviceError> {
        let tag = self.next_tag.to_string();
        self.next_tag += 1;
        words.push(format!(".tag={}", tag));

        write_sentence(&mut self.stream, &words).await?;

        let mut reply = Reply::default();
        let mut trap: Option<DeviceError> = None;

        loop {
            let sentence = read_sentence(&mut self.stream).await?;
            let frame = ResultFrame::parse(&sentence)?;

            if let Some(frame_tag) = frame.tag() {
                if frame_tag != tag {
                    debug!("忽略过期回复 (tag={}, 当前={})", frame_tag, tag);
                    continue;
                }
            }

            match frame {
                ResultFrame::Reply { record, .. } => {
                    if record.is_ghost() {
                        debug!("过滤幽灵记录 (tag={})", tag);
                    } else {
                        reply.records.push(record);
                    }
                }
                // 空结果帧：命令已接受但没有数据，保留 tag 继续等待 !done
                ResultFrame::Empty { .. } => {}
                ResultFrame::Trap { category, message, .. } => {
                    trap = Some(DeviceError::from_trap(category, message));
                }
                ResultFrame::Done { attrs, .. } => {
                    reply.done = attrs;
                    break;
                }
                ResultFrame::Fatal(message) => {
                    return Err(DeviceError::Fatal(message));
                }
            }
        }

        match trap {
            Some(err) => Err(err),
            None => Ok(reply),
        }
    }

    /// 关闭会话（忽略所有错误）
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let quit = vec!["/quit".to_string()];
        if let Err(e) = write_sentence(&mut self.stream, &quit).await {
            debug!("发送 /quit 失败: {}", e);
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!("关闭连接失败: {}", e);
        }
    }
}

#[async_trait]
impl<S> DeviceSession for ApiSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn call(
        &mut self,
        path: &str,
        verb: Verb,
        params: &[(String, String)],
    ) -> Result<Vec<Record>, DeviceError> {
        let words = command_words(path, &verb, params);
        match self.execute(words).await {
            Ok(reply) => Ok(reply.records),
            Err(e) => {
                if !e.is_not_found() {
                    warn!("命令 {}/{} 失败: {}", path, verb.as_str(), e);
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::word::encode_sentence;
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    /// 读取客户端发来的句子，返回其 tag
    async fn read_request(server: &mut DuplexStream) -> (Vec<String>, String) {
        let words = read_sentence(server).await.unwrap();
        let tag = words
            .iter()
            .find_map(|w| w.strip_prefix(".tag=").map(|t| t.to_string()))
            .unwrap();
        (words, tag)
    }

    async fn send(server: &mut DuplexStream, words: &[String]) {
        server.write_all(&encode_sentence(words)).await.unwrap();
    }

    fn w(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_frame_is_normalized_to_empty_list() {
        let (client, mut server) = duplex(4096);
        let mut session = ApiSession::new(client, Duration::from_secs(5));

        let device = tokio::spawn(async move {
            let (words, tag) = read_request(&mut server).await;
            assert_eq!(words[0], "/ppp/active/print");
            assert_eq!(words[1], "?name=alice");
            send(&mut server, &["!empty".to_string(), format!(".tag={}", tag)]).await;
            send(&mut server, &["!done".to_string(), format!(".tag={}", tag)]).await;
            server
        });

        let records = session
            .call("/ppp/active", Verb::Get, &[("name".to_string(), "alice".to_string())])
            .await
            .unwrap();
        assert!(records.is_empty());
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_ghost_reply_filtered_and_real_records_kept() {
        let (client, mut server) = duplex(4096);
        let mut session = ApiSession::new(client, Duration::from_secs(5));

        let device = tokio::spawn(async move {
            let (_, tag) = read_request(&mut server).await;
            let t = format!(".tag={}", tag);
            send(&mut server, &["!re".to_string(), t.clone()]).await;
            send(&mut server, &w(&["!re", "=.id=*2", "=name=bob", &t])).await;
            send(&mut server, &["!done".to_string(), t]).await;
            server
        });

        let records = session.call("/ppp/secret", Verb::Get, &[]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some("bob"));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_tag_frames_are_skipped() {
        let (client, mut server) = duplex(4096);
        let mut session = ApiSession::new(client, Duration::from_secs(5));

        let device = tokio::spawn(async move {
            let (_, tag) = read_request(&mut server).await;
            send(&mut server, &w(&["!re", "=.id=*9", "=name=old", ".tag=999"])).await;
            send(&mut server, &w(&["!done", ".tag=999"])).await;
            send(&mut server, &["!done".to_string(), format!(".tag={}", tag)]).await;
            server
        });

        let records = session.call("/ppp/secret", Verb::Get, &[]).await.unwrap();
        assert!(records.is_empty());
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_trap_waits_for_done_and_maps_not_found() {
        let (client, mut server) = duplex(4096);
        let mut session = ApiSession::new(client, Duration::from_secs(5));

        let device = tokio::spawn(async move {
            for _ in 0..2 {
                let (_, tag) = read_request(&mut server).await;
                let t = format!(".tag={}", tag);
                send(&mut server, &w(&["!trap", "=message=no such item", &t])).await;
                send(&mut server, &["!done".to_string(), t]).await;
            }
            server
        });

        let err = session
            .call("/ppp/secret", Verb::Remove, &[(".id".to_string(), "*1".to_string())])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        // 会话在 trap 之后仍然可用
        let err = session
            .call("/ppp/secret", Verb::Remove, &[(".id".to_string(), "*1".to_string())])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_trap_is_auth_error() {
        let (client, mut server) = duplex(4096);
        let mut session = ApiSession::new(client, Duration::from_secs(5));

        let device = tokio::spawn(async move {
            let (words, tag) = read_request(&mut server).await;
            assert_eq!(words[0], "/login");
            let t = format!(".tag={}", tag);
            send(&mut server, &w(&["!trap", "=message=invalid user name or password (6)", &t])).await;
            send(&mut server, &["!done".to_string(), t]).await;
            server
        });

        let err = session.login("admin", "wrong").await.unwrap_err();
        assert!(matches!(err, DeviceError::Auth(_)));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_closes_session() {
        let (client, _server) = duplex(4096);
        let mut session = ApiSession::new(client, Duration::from_millis(50));

        let err = session.call("/ppp/secret", Verb::Get, &[]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));

        let err = session.call("/ppp/secret", Verb::Get, &[]).await.unwrap_err();
        assert!(matches!(err, DeviceError::Connection(_)));
    }
}
