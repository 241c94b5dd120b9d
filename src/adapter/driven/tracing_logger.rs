use crate::domain::port::{LogLevel, Logger};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// tracing へ転送するロガー実装
/// 追加コンテキストは JSON 文字列として `context` フィールドに出力する
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }

    fn emit(
        &self,
        level: LogLevel,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    ) {
        let correlation_id = correlation_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        let context = render_context(context);

        match level {
            LogLevel::Debug => tracing::debug!(
                component,
                correlation_id = %correlation_id,
                context = %context,
                "{}",
                message
            ),
            LogLevel::Info => tracing::info!(
                component,
                correlation_id = %correlation_id,
                context = %context,
                "{}",
                message
            ),
            LogLevel::Warning => tracing::warn!(
                component,
                correlation_id = %correlation_id,
                context = %context,
                "{}",
                message
            ),
            LogLevel::Error => tracing::error!(
                component,
                correlation_id = %correlation_id,
                context = %context,
                "{}",
                message
            ),
        }
    }
}

/// キー順に並べた JSON オブジェクトとして描画する
fn render_context(context: Option<HashMap<String, String>>) -> String {
    let Some(context) = context.filter(|ctx| !ctx.is_empty()) else {
        return String::new();
    };
    let ordered: BTreeMap<String, String> = context.into_iter().collect();
    serde_json::to_string(&ordered).unwrap_or_default()
}

impl Logger for TracingLogger {
    fn debug(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    ) {
        self.emit(LogLevel::Debug, component, message, correlation_id, context);
    }

    fn info(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    ) {
        self.emit(LogLevel::Info, component, message, correlation_id, context);
    }

    fn warn(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    ) {
        self.emit(LogLevel::Warning, component, message, correlation_id, context);
    }

    fn error(
        &self,
        component: &str,
        message: &str,
        correlation_id: Option<Uuid>,
        context: Option<HashMap<String, String>>,
    ) {
        self.emit(LogLevel::Error, component, message, correlation_id, context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_context_is_sorted_json() {
        let mut context = HashMap::new();
        context.insert("quantity".to_string(), "10".to_string());
        context.insert("protocol".to_string(), "PCK-000001".to_string());

        assert_eq!(
            render_context(Some(context)),
            r#"{"protocol":"PCK-000001","quantity":"10"}"#
        );
    }

    #[test]
    fn test_render_empty_context() {
        assert_eq!(render_context(None), "");
        assert_eq!(render_context(Some(HashMap::new())), "");
    }

    #[test]
    fn test_logger_without_subscriber() {
        // 購読者が無くても出力呼び出しは失敗しない
        let logger = TracingLogger::new();
        logger.info("TestComponent", "Test message", Some(Uuid::new_v4()), None);
        logger.error("TestComponent", "Test message", None, Some(HashMap::new()));
    }
}
