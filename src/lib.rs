//! amq2api
//!
//! 把 Anthropic Messages 与 OpenAI Chat Completions 请求转换为 Amazon Q
//! 流式后端调用，并在多个后端账号之间调度。

pub mod config;
pub mod credential;
pub mod database;
pub mod error;
pub mod gateway;
pub mod logger;
pub mod models;
pub mod pool;
pub mod providers;
pub mod resilience;
pub mod server;
pub mod stream;
pub mod telemetry;
pub mod translator;

pub use config::Config;
pub use error::GatewayError;
pub use gateway::{Gateway, GatewayResponse};
