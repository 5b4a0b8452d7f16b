//! 日志初始化与脱敏
//!
//! 上游错误响应体和凭证刷新失败信息可能携带 token，
//! 写入日志或回传客户端之前必须经过 `sanitize_log_message`。

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::Level;

use crate::config::LoggingConfig;

/// 脱敏规则（模式, 替换）
static SANITIZE_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let patterns: [(&str, &str); 6] = [
        (r"Bearer\s+[A-Za-z0-9._~+/=-]+", "Bearer ***"),
        (
            r#"(?i)access[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "access_token: ***",
        ),
        (
            r#"(?i)refresh[_-]?token["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "refresh_token: ***",
        ),
        (
            r#"(?i)client[_-]?secret["']?\s*[:=]\s*["']?[A-Za-z0-9._~+/=-]+"#,
            "client_secret: ***",
        ),
        (
            r#"(?i)api[_-]?key["']?\s*[:=]\s*["']?[A-Za-z0-9._-]+"#,
            "api_key: ***",
        ),
        (
            r#"(?i)authorization["']?\s*[:=]\s*["']?[A-Za-z0-9._\s-]+"#,
            "authorization: ***",
        ),
    ];
    patterns
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
});

/// 对日志消息中的凭证信息脱敏
pub fn sanitize_log_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for (re, replacement) in SANITIZE_RULES.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).into_owned();
    }
    sanitized
}

fn parse_level(level: &str) -> Level {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// 初始化全局 tracing 订阅器
///
/// 重复调用时静默忽略（测试中可能多次初始化）。
pub fn init_tracing(config: &LoggingConfig) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.level))
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_bearer_token() {
        let output = sanitize_log_message("Authorization: Bearer abcDEF123._-XYZ");
        assert!(!output.contains("abcDEF123"));
        assert!(output.contains("***"));
    }

    #[test]
    fn test_sanitize_camel_case_refresh_token() {
        let output = sanitize_log_message(r#"{"refreshToken":"aorAAAAAGk-xyz","clientId":"c1"}"#);
        assert!(output.contains("refresh_token: ***"));
        assert!(!output.contains("aorAAAAAGk"));
        assert!(output.contains("clientId"));
    }

    #[test]
    fn test_sanitize_access_token() {
        let output = sanitize_log_message("accessToken=atk_12345");
        assert!(output.contains("access_token: ***"));
        assert!(!output.contains("atk_12345"));
    }

    #[test]
    fn test_sanitize_client_secret() {
        let output = sanitize_log_message("client_secret = \"cs_SeCreT-999\"");
        assert!(output.contains("client_secret: ***"));
        assert!(!output.contains("cs_SeCreT"));
    }

    #[test]
    fn test_plain_text_unchanged() {
        let input = "上游返回 ThrottlingException，请稍后重试";
        assert_eq!(sanitize_log_message(input), input);
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("nonsense"), Level::INFO);
    }
}
