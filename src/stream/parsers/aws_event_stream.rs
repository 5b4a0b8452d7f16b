//! AWS Event Stream 增量解码器
//!
//! Amazon Q 以 `application/vnd.amazon.eventstream` 二进制帧返回流式响应：
//!
//! ```text
//! +--------------+---------------+--------------+---------+---------+-------------+
//! | total_len u32| headers_len u32| prelude_crc | headers | payload | message_crc |
//! +--------------+---------------+--------------+---------+---------+-------------+
//!   大端序          大端序          CRC32(前 8 字节)                   CRC32(之前全部)
//! ```
//!
//! 头部为重复的 `name_len u8 | name | type u8 | value` 三元组。
//!
//! 解码器只消费缓冲区，不产生其他副作用：数据不足时返回 `Ok(None)`，
//! 校验失败后进入失败状态，之后的每次调用都返回同一个错误。
//! 每个上游连接需要一个新的解码器实例。

use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use thiserror::Error;

/// prelude 长度（total_len + headers_len + prelude_crc）
const PRELUDE_LEN: usize = 12;
/// 最小帧长度（prelude + message_crc）
const MIN_FRAME_LEN: usize = PRELUDE_LEN + 4;
/// 单帧长度上限
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// `:message-type` 头
pub const MESSAGE_TYPE_HEADER: &str = ":message-type";
/// `:event-type` 头
pub const EVENT_TYPE_HEADER: &str = ":event-type";
/// `:exception-type` 头
pub const EXCEPTION_TYPE_HEADER: &str = ":exception-type";
/// `:error-code` 头
pub const ERROR_CODE_HEADER: &str = ":error-code";
/// `:error-message` 头
pub const ERROR_MESSAGE_HEADER: &str = ":error-message";

/// 解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("prelude 校验和不匹配: 期望 {expected:#010x}, 实际 {actual:#010x}")]
    PreludeChecksum { expected: u32, actual: u32 },
    #[error("消息校验和不匹配: 期望 {expected:#010x}, 实际 {actual:#010x}")]
    MessageChecksum { expected: u32, actual: u32 },
    #[error("帧长度无效: {0}")]
    InvalidLength(usize),
    #[error("头部无效: {0}")]
    InvalidHeader(String),
    #[error("流在帧中途结束，剩余 {0} 字节")]
    Truncated(usize),
}

/// 头部值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Bytes(Bytes),
    String(String),
    /// 毫秒时间戳
    Timestamp(i64),
    Uuid([u8; 16]),
}

impl HeaderValue {
    fn type_id(&self) -> u8 {
        match self {
            HeaderValue::Bool(true) => 0,
            HeaderValue::Bool(false) => 1,
            HeaderValue::Byte(_) => 2,
            HeaderValue::Short(_) => 3,
            HeaderValue::Int(_) => 4,
            HeaderValue::Long(_) => 5,
            HeaderValue::Bytes(_) => 6,
            HeaderValue::String(_) => 7,
            HeaderValue::Timestamp(_) => 8,
            HeaderValue::Uuid(_) => 9,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// 后端事件帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEventFrame {
    pub headers: IndexMap<String, HeaderValue>,
    pub payload: Bytes,
}

impl BackendEventFrame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(HeaderValue::as_str)
    }

    /// `:message-type`，缺省视为 event
    pub fn message_type(&self) -> &str {
        self.header_str(MESSAGE_TYPE_HEADER).unwrap_or("event")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(EVENT_TYPE_HEADER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DecoderState {
    Active,
    Failed(DecodeError),
}

/// 增量解码器
#[derive(Debug)]
pub struct EventStreamDecoder {
    buffer: BytesMut,
    state: DecoderState,
    frames_decoded: u64,
}

impl Default for EventStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: DecoderState::Active,
            frames_decoded: 0,
        }
    }

    /// 追加上游字节
    pub fn feed(&mut self, chunk: &[u8]) {
        if self.state == DecoderState::Active {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// 已缓冲但尚未消费的字节数
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// 取出下一个完整帧
    ///
    /// - `Ok(Some(frame))` 完整帧
    /// - `Ok(None)` 需要更多数据
    /// - `Err(_)` 流已损坏，不可恢复
    pub fn next_frame(&mut self) -> Result<Option<BackendEventFrame>, DecodeError> {
        if let DecoderState::Failed(err) = &self.state {
            return Err(err.clone());
        }
        match self.try_decode() {
            Ok(frame) => {
                if frame.is_some() {
                    self.frames_decoded += 1;
                }
                Ok(frame)
            }
            Err(err) => {
                self.buffer.clear();
                self.state = DecoderState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// 追加字节并取出所有完整帧
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<BackendEventFrame>, DecodeError> {
        self.feed(chunk);
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// 上游结束时调用：缓冲区还有残留字节说明流在帧中途被截断
    pub fn finish(&mut self) -> Result<(), DecodeError> {
        if let DecoderState::Failed(err) = &self.state {
            return Err(err.clone());
        }
        if self.buffer.is_empty() {
            Ok(())
        } else {
            let err = DecodeError::Truncated(self.buffer.len());
            self.buffer.clear();
            self.state = DecoderState::Failed(err.clone());
            Err(err)
        }
    }

    fn try_decode(&mut self) -> Result<Option<BackendEventFrame>, DecodeError> {
        if self.buffer.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let prelude = &self.buffer[..PRELUDE_LEN];
        let total_len = read_u32(&prelude[0..4]) as usize;
        let headers_len = read_u32(&prelude[4..8]) as usize;
        let expected = read_u32(&prelude[8..12]);
        let actual = crc32fast::hash(&prelude[..8]);
        if expected != actual {
            return Err(DecodeError::PreludeChecksum { expected, actual });
        }
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len) {
            return Err(DecodeError::InvalidLength(total_len));
        }
        if headers_len > total_len - MIN_FRAME_LEN {
            return Err(DecodeError::InvalidHeader(format!(
                "头部长度 {} 超出帧长度 {}",
                headers_len, total_len
            )));
        }

        if self.buffer.len() < total_len {
            return Ok(None);
        }

        let frame = self.buffer.split_to(total_len).freeze();
        let expected = read_u32(&frame[total_len - 4..]);
        let actual = crc32fast::hash(&frame[..total_len - 4]);
        if expected != actual {
            return Err(DecodeError::MessageChecksum { expected, actual });
        }

        let headers = parse_headers(&frame[PRELUDE_LEN..PRELUDE_LEN + headers_len])?;
        let payload = frame.slice(PRELUDE_LEN + headers_len..total_len - 4);
        Ok(Some(BackendEventFrame { headers, payload }))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn take<'a>(buf: &mut &'a [u8], len: usize, what: &str) -> Result<&'a [u8], DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::InvalidHeader(format!("{} 被截断", what)));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

fn parse_headers(mut buf: &[u8]) -> Result<IndexMap<String, HeaderValue>, DecodeError> {
    let mut headers = IndexMap::new();
    while !buf.is_empty() {
        let name_len = take(&mut buf, 1, "头部名长度")?[0] as usize;
        let name = std::str::from_utf8(take(&mut buf, name_len, "头部名")?)
            .map_err(|_| DecodeError::InvalidHeader("头部名不是有效 UTF-8".into()))?
            .to_string();
        let value_type = take(&mut buf, 1, "头部类型")?[0];
        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => HeaderValue::Byte(take(&mut buf, 1, &name)?[0] as i8),
            3 => HeaderValue::Short((&mut take(&mut buf, 2, &name)?).get_i16()),
            4 => HeaderValue::Int((&mut take(&mut buf, 4, &name)?).get_i32()),
            5 => HeaderValue::Long((&mut take(&mut buf, 8, &name)?).get_i64()),
            6 | 7 => {
                let len = (&mut take(&mut buf, 2, &name)?).get_u16() as usize;
                let raw = take(&mut buf, len, &name)?;
                if value_type == 6 {
                    HeaderValue::Bytes(Bytes::copy_from_slice(raw))
                } else {
                    let s = std::str::from_utf8(raw).map_err(|_| {
                        DecodeError::InvalidHeader(format!("头部 {} 不是有效 UTF-8", name))
                    })?;
                    HeaderValue::String(s.to_string())
                }
            }
            8 => HeaderValue::Timestamp((&mut take(&mut buf, 8, &name)?).get_i64()),
            9 => {
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(take(&mut buf, 16, &name)?);
                HeaderValue::Uuid(uuid)
            }
            other => {
                return Err(DecodeError::InvalidHeader(format!(
                    "头部 {} 类型未知: {}",
                    name, other
                )))
            }
        };
        headers.insert(name, value);
    }
    Ok(headers)
}

/// 将帧编码为 AWS Event Stream 字节
///
/// 用于构造测试夹具；头部名超过 255 字节或字符串/字节值超过 65535 字节时截断长度字段无意义，调用方需保证。
pub fn encode_frame(frame: &BackendEventFrame) -> Bytes {
    let mut headers = BytesMut::new();
    for (name, value) in &frame.headers {
        headers.put_u8(name.len() as u8);
        headers.put_slice(name.as_bytes());
        headers.put_u8(value.type_id());
        match value {
            HeaderValue::Bool(_) => {}
            HeaderValue::Byte(v) => headers.put_i8(*v),
            HeaderValue::Short(v) => headers.put_i16(*v),
            HeaderValue::Int(v) => headers.put_i32(*v),
            HeaderValue::Long(v) | HeaderValue::Timestamp(v) => headers.put_i64(*v),
            HeaderValue::Bytes(v) => {
                headers.put_u16(v.len() as u16);
                headers.put_slice(v);
            }
            HeaderValue::String(v) => {
                headers.put_u16(v.len() as u16);
                headers.put_slice(v.as_bytes());
            }
            HeaderValue::Uuid(v) => headers.put_slice(v),
        }
    }

    let total_len = MIN_FRAME_LEN + headers.len() + frame.payload.len();
    let mut out = BytesMut::with_capacity(total_len);
    out.put_u32(total_len as u32);
    out.put_u32(headers.len() as u32);
    let prelude_crc = crc32fast::hash(&out[..8]);
    out.put_u32(prelude_crc);
    out.put_slice(&headers);
    out.put_slice(&frame.payload);
    let message_crc = crc32fast::hash(&out);
    out.put_u32(message_crc);
    out.freeze()
}

/// 构造一个 `:message-type = event` 的 JSON 事件帧
pub fn event_frame(event_type: &str, payload: &serde_json::Value) -> BackendEventFrame {
    let mut headers = IndexMap::new();
    headers.insert(
        EVENT_TYPE_HEADER.to_string(),
        HeaderValue::String(event_type.to_string()),
    );
    headers.insert(
        ":content-type".to_string(),
        HeaderValue::String("application/json".to_string()),
    );
    headers.insert(
        MESSAGE_TYPE_HEADER.to_string(),
        HeaderValue::String("event".to_string()),
    );
    BackendEventFrame {
        headers,
        payload: Bytes::from(payload.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_frame(text: &str) -> BackendEventFrame {
        event_frame("assistantResponseEvent", &json!({ "content": text }))
    }

    #[test]
    fn test_decode_single_frame() {
        let frame = text_frame("Hello");
        let bytes = encode_frame(&frame);

        let mut decoder = EventStreamDecoder::new();
        let frames = decoder.decode(&bytes).unwrap();
        assert_eq!(frames, vec![frame]);
        assert_eq!(frames[0].event_type(), Some("assistantResponseEvent"));
        assert_eq!(frames[0].message_type(), "event");
        assert_eq!(decoder.buffered_len(), 0);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_need_more_data_is_not_an_error() {
        let bytes = encode_frame(&text_frame("partial"));
        let mut decoder = EventStreamDecoder::new();

        // 逐字节喂入，直到最后一个字节前都应返回 None
        for (i, byte) in bytes.iter().enumerate() {
            decoder.feed(&[*byte]);
            let result = decoder.next_frame().unwrap();
            if i + 1 < bytes.len() {
                assert!(result.is_none(), "frame emitted early at byte {}", i);
            } else {
                assert!(result.is_some());
            }
        }
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let a = text_frame("a");
        let b = text_frame("b");
        let mut bytes = BytesMut::new();
        bytes.extend_from_slice(&encode_frame(&a));
        bytes.extend_from_slice(&encode_frame(&b));
        // 第三帧只给一半
        let c = encode_frame(&text_frame("c"));
        bytes.extend_from_slice(&c[..c.len() / 2]);

        let mut decoder = EventStreamDecoder::new();
        let frames = decoder.decode(&bytes).unwrap();
        assert_eq!(frames, vec![a, b]);
        assert_eq!(decoder.buffered_len(), c.len() / 2);

        let frames = decoder.decode(&c[c.len() / 2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.frames_decoded(), 3);
    }

    #[test]
    fn test_message_checksum_mismatch_is_fatal() {
        let mut bytes = encode_frame(&text_frame("Hello")).to_vec();
        let payload_pos = bytes.len() - 6;
        bytes[payload_pos] ^= 0xff;

        let mut decoder = EventStreamDecoder::new();
        let err = decoder.decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::MessageChecksum { .. }));

        // 不可恢复：后续合法数据也无法解码
        let good = encode_frame(&text_frame("again"));
        assert_eq!(decoder.decode(&good).unwrap_err(), err);
        assert_eq!(decoder.finish().unwrap_err(), err);
    }

    #[test]
    fn test_prelude_checksum_checked_before_full_frame() {
        let mut bytes = encode_frame(&text_frame("Hello")).to_vec();
        bytes[9] ^= 0x01;

        let mut decoder = EventStreamDecoder::new();
        decoder.feed(&bytes[..PRELUDE_LEN]);
        assert!(matches!(
            decoder.next_frame(),
            Err(DecodeError::PreludeChecksum { .. })
        ));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut prelude = BytesMut::new();
        prelude.put_u32((MAX_FRAME_LEN + 1) as u32);
        prelude.put_u32(0);
        let crc = crc32fast::hash(&prelude);
        prelude.put_u32(crc);

        let mut decoder = EventStreamDecoder::new();
        decoder.feed(&prelude);
        assert_eq!(
            decoder.next_frame(),
            Err(DecodeError::InvalidLength(MAX_FRAME_LEN + 1))
        );
    }

    #[test]
    fn test_truncated_stream_reported_on_finish() {
        let bytes = encode_frame(&text_frame("Hello"));
        let mut decoder = EventStreamDecoder::new();
        decoder.feed(&bytes[..bytes.len() - 3]);
        assert!(decoder.next_frame().unwrap().is_none());
        assert_eq!(
            decoder.finish(),
            Err(DecodeError::Truncated(bytes.len() - 3))
        );
    }

    #[test]
    fn test_all_header_types() {
        let mut headers = IndexMap::new();
        headers.insert("t".to_string(), HeaderValue::Bool(true));
        headers.insert("f".to_string(), HeaderValue::Bool(false));
        headers.insert("b".to_string(), HeaderValue::Byte(-3));
        headers.insert("s".to_string(), HeaderValue::Short(-300));
        headers.insert("i".to_string(), HeaderValue::Int(70_000));
        headers.insert("l".to_string(), HeaderValue::Long(-1 << 40));
        headers.insert(
            "bytes".to_string(),
            HeaderValue::Bytes(Bytes::from_static(&[0, 1, 2])),
        );
        headers.insert("str".to_string(), HeaderValue::String("值".to_string()));
        headers.insert("ts".to_string(), HeaderValue::Timestamp(1_700_000_000_000));
        headers.insert("id".to_string(), HeaderValue::Uuid([7u8; 16]));
        let frame = BackendEventFrame {
            headers,
            payload: Bytes::new(),
        };

        let mut decoder = EventStreamDecoder::new();
        let frames = decoder.decode(&encode_frame(&frame)).unwrap();
        assert_eq!(frames, vec![frame]);
    }
}
