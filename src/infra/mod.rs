//! 基础设施层 - tmux 和进程树的外部协作者接口
//!
//! Discovery 和 Orchestrator 只依赖这里的 trait，具体实现
//! （tmux 命令行、sysinfo）可以在测试里替换为假对象。

pub mod process;
pub mod tmux;

use std::sync::Arc;

use anyhow::Result;

use crate::signature::{AgentSignature, SignatureCatalog};

/// 一个 tmux pane 的枚举信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneInfo {
    /// pane 标识，形如 `session:window.pane`
    pub pane_id: String,
    /// pane 的根进程 pid
    pub pane_pid: u32,
    pub session_name: String,
    pub window_index: u32,
    pub pane_index: u32,
}

/// pane 枚举与内容捕获
pub trait PaneBackend {
    /// 列出所有 pane；失败时返回错误，调用方按"本 tick 无数据"降级
    fn list_panes(&self) -> Result<Vec<PaneInfo>>;

    /// 捕获 pane 最后 N 行终端文本，失败时返回空串
    fn capture_pane(&self, pane_id: &str, lines: u32) -> String;
}

/// 进程树检查
pub trait ProcessProbe {
    /// 每个 tick 开始时刷新进程快照
    fn refresh(&mut self);

    /// 在 root_pid 的进程树中查找首个命中签名的进程
    fn find_signature_in_tree(
        &self,
        root_pid: u32,
        catalog: &SignatureCatalog,
    ) -> Option<Arc<AgentSignature>>;

    /// 进程是否存活（存在且不是 zombie）
    fn is_alive(&self, pid: u32) -> bool;

    /// 进程退出码，仅在可观测时返回 Some
    fn exit_code(&self, pid: u32) -> Option<i32>;
}

pub use process::SysinfoProbe;
pub use tmux::TmuxManager;
