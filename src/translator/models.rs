//! 模型别名与模型目录
//!
//! OpenAI 入口的模型名称通过别名表映射为后端模型；
//! Anthropic 入口的模型名称原样使用，不做任何改写。

use crate::models::openai::{ModelInfo, ModelList};

/// 后端支持的模型
pub const BACKEND_MODELS: &[&str] = &["claude-sonnet-4", "claude-sonnet-4.5", "claude-3.7-sonnet"];

/// OpenAI 模型别名表 (别名, 后端模型)
pub const MODEL_ALIASES: &[(&str, &str)] = &[
    ("gpt-4", "claude-sonnet-4"),
    ("gpt-4-turbo", "claude-sonnet-4.5"),
    ("gpt-4-turbo-preview", "claude-sonnet-4.5"),
    ("gpt-4o", "claude-sonnet-4.5"),
    ("gpt-4o-mini", "claude-sonnet-4"),
    ("gpt-3.5-turbo", "claude-sonnet-4"),
];

/// 缺省模型（Anthropic 请求未携带 model 时使用）
pub const DEFAULT_MODEL: &str = "claude-sonnet-4.5";

/// 目录条目的固定创建时间，保证多次调用结果一致
pub const CATALOG_CREATED: u64 = 1_735_689_600;

/// 解析 OpenAI 模型别名，未知名称原样返回
pub fn resolve_alias(model: &str) -> String {
    match MODEL_ALIASES.iter().find(|(alias, _)| *alias == model) {
        Some((_, target)) => {
            tracing::debug!("[MODEL] 别名映射: {} -> {}", model, target);
            (*target).to_string()
        }
        None => model.to_string(),
    }
}

/// 构建模型目录：后端模型在前，别名在后
pub fn model_catalog() -> ModelList {
    let backend = BACKEND_MODELS.iter().map(|id| ModelInfo {
        id: (*id).to_string(),
        object: "model".to_string(),
        created: CATALOG_CREATED,
        owned_by: "anthropic".to_string(),
    });
    let aliases = MODEL_ALIASES.iter().map(|(alias, _)| ModelInfo {
        id: (*alias).to_string(),
        object: "model".to_string(),
        created: CATALOG_CREATED,
        owned_by: "openai".to_string(),
    });

    ModelList {
        object: "list".to_string(),
        data: backend.chain(aliases).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_alias() {
        assert_eq!(resolve_alias("gpt-4"), "claude-sonnet-4");
        assert_eq!(resolve_alias("gpt-4o"), "claude-sonnet-4.5");
        assert_eq!(resolve_alias("gpt-3.5-turbo"), "claude-sonnet-4");
        assert_eq!(resolve_alias("claude-3.7-sonnet"), "claude-3.7-sonnet");
        assert_eq!(resolve_alias("my-custom-model"), "my-custom-model");
    }

    #[test]
    fn test_catalog_is_stable() {
        let first = model_catalog();
        let second = model_catalog();
        assert_eq!(first, second);
        assert_eq!(first.object, "list");
        assert_eq!(first.data.len(), BACKEND_MODELS.len() + MODEL_ALIASES.len());
        assert_eq!(first.data[0].owned_by, "anthropic");
        assert_eq!(first.data.last().map(|m| m.owned_by.as_str()), Some("openai"));
    }
}
