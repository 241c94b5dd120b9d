// 駆動される側アダプター（セッション実装・ロガー）

mod in_memory_session;
mod mysql_session;
mod tracing_logger;

pub use in_memory_session::{InMemorySession, InMemorySessionFactory};
pub use mysql_session::{MySqlSession, MySqlSessionFactory};
pub use tracing_logger::TracingLogger;
