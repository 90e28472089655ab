//! API 字（word）编解码
//!
//! 设备命令通道上的最小单位是"字"：变长长度前缀 + UTF-8 内容。
//! 若干个字组成一个句子（sentence），句子以零长度字结束。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DeviceError;

/// 单个字允许的最大长度（防止异常帧耗尽内存）
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

/// 编码字长度前缀
pub fn encode_length(len: usize) -> Vec<u8> {
    let len = len as u32;
    if len < 0x80 {
        vec![len as u8]
    } else if len < 0x4000 {
        let v = len | 0x8000;
        vec![(v >> 8) as u8, v as u8]
    } else if len < 0x20_0000 {
        let v = len | 0xC0_0000;
        vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else if len < 0x1000_0000 {
        let v = len | 0xE000_0000;
        vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
    } else {
        vec![0xF0, (len >> 24) as u8, (len >> 16) as u8, (len >> 8) as u8, len as u8]
    }
}

/// 编码一个完整句子（含结尾的零长度字）
pub fn encode_sentence<S: AsRef<str>>(words: &[S]) -> Vec<u8> {
    let mut buf = Vec::new();
    for word in words {
        let bytes = word.as_ref().as_bytes();
        buf.extend_from_slice(&encode_length(bytes.len()));
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
    buf
}

/// 读取字长度前缀
pub async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<usize, DeviceError> {
    let first = reader.read_u8().await?;

    let (extra, initial) = if first & 0x80 == 0x00 {
        (0, first as u32)
    } else if first & 0xC0 == 0x80 {
        (1, (first & 0x3F) as u32)
    } else if first & 0xE0 == 0xC0 {
        (2, (first & 0x1F) as u32)
    } else if first & 0xF0 == 0xE0 {
        (3, (first & 0x0F) as u32)
    } else if first == 0xF0 {
        (4, 0)
    } else {
        return Err(DeviceError::Protocol(format!("无效的长度前缀: 0x{:02X}", first)));
    };

    let mut len = initial;
    for _ in 0..extra {
        len = (len << 8) | reader.read_u8().await? as u32;
    }

    Ok(len as usize)
}

/// 读取一个字；返回空字符串表示句子结束
pub async fn read_word<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, DeviceError> {
    let len = read_length(reader).await?;
    if len == 0 {
        return Ok(String::new());
    }
    if len > MAX_WORD_LEN {
        return Err(DeviceError::Protocol(format!("字长度超限: {}", len)));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    // 设备可能返回非 UTF-8 的注释内容，宽松解码
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// 读取一个完整句子
pub async fn read_sentence<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<String>, DeviceError> {
    let mut words = Vec::new();
    loop {
        let word = read_word(reader).await?;
        if word.is_empty() {
            // 空句子（心跳）直接跳过
            if words.is_empty() {
                continue;
            }
            return Ok(words);
        }
        words.push(word);
    }
}

/// 写入一个完整句子并刷新
pub async fn write_sentence<W: AsyncWrite + Unpin, S: AsRef<str>>(
    writer: &mut W,
    words: &[S],
) -> Result<(), DeviceError> {
    writer.write_all(&encode_sentence(words)).await?;
    writer.flush().await?;
    Ok(())
}
