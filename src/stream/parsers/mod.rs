//! 后端流格式解析器
//!
//! Amazon Q 以 AWS Event Stream 二进制帧返回响应，
//! 这里负责把字节流切分为 `BackendEventFrame`。

pub mod aws_event_stream;

pub use aws_event_stream::{
    encode_frame, event_frame, BackendEventFrame, DecodeError, EventStreamDecoder, HeaderValue,
};
