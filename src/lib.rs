//! Tmux Agent Monitor - 监控 tmux pane 里的 AI 编码代理会话
//!
//! 核心链路：Discovery 枚举 pane 并匹配签名 → Registry 合并出
//! 持久的会话集合 → Classifier 纯函数推断状态 → Notification
//! 检测值得告警的转移 → Summarizer 用 LLM 总结目标和进度。
//! 所有状态都在内存里，重启后从头重建。

pub mod config;
pub mod discovery;
pub mod infra;
pub mod links;
pub mod notification;
pub mod orchestrator;
pub mod registry;
pub mod signature;
pub mod spawn;
pub mod status;
pub mod summarize;

// Re-exports
pub use config::{MonitorConfig, SummaryConfig};
pub use discovery::{Discovery, PaneSnapshot};
pub use infra::{PaneBackend, PaneInfo, ProcessProbe, SysinfoProbe, TmuxManager};
pub use links::{CustomLinkConfig, DetectedLink, LinkPlugin, LinkRegistry};
pub use notification::NotificationEngine;
pub use orchestrator::PollOrchestrator;
pub use registry::{Session, SessionRegistry};
pub use signature::{AgentSignature, CustomAgentConfig, SignatureCatalog};
pub use spawn::Spawner;
pub use status::{classify, content_changed, SessionStatus};
pub use summarize::{build_provider, ProviderKind, SessionSummary, Summarizer, SummaryProvider};
