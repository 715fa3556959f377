//! 会话注册表 - 跨 tick 维护被跟踪的会话集合
//!
//! 注册表只回答"哪些会话存在"：reconcile 负责创建/保留/驱逐，
//! 文本推导的字段（状态、目标、链接、时间戳）由 Orchestrator 在
//! 每个 tick 里单独更新，这里一概不碰。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use tracing::{debug, info};

use crate::discovery::PaneSnapshot;
use crate::links::DetectedLink;
use crate::signature::AgentSignature;
use crate::status::SessionStatus;

/// 一个被跟踪的编码代理会话，按 pane 标识索引
#[derive(Debug, Clone)]
pub struct Session {
    pub pane_id: String,
    pub pane_pid: u32,
    pub session_name: String,
    pub window_index: u32,
    pub pane_index: u32,

    /// 代理进程是否存活
    pub agent_alive: bool,
    pub signature: Option<Arc<AgentSignature>>,
    pub status: SessionStatus,
    pub exit_code: Option<i32>,

    /// LLM 总结出的目标与进度
    pub goal: Option<String>,
    pub progress: Option<String>,
    /// 终端输出中识别到的链接，按 URL 去重
    pub links: Vec<DetectedLink>,

    /// 最近一次输出变化的时刻
    pub last_output_time: Instant,
    /// 最近一次捕获内容的指纹
    pub last_content_hash: u64,
    /// 本次 attention 周期是否已经告警过
    pub alerted: bool,
    /// 是否由本工具显式创建
    pub spawned_here: bool,

    /// 首次跟踪时刻，仅用于展示
    pub tracked_at: DateTime<Local>,
}

impl Session {
    fn from_snapshot(snapshot: &PaneSnapshot, spawned_here: bool) -> Self {
        Self {
            pane_id: snapshot.pane_id.clone(),
            pane_pid: snapshot.pane_pid,
            session_name: snapshot.session_name.clone(),
            window_index: snapshot.window_index,
            pane_index: snapshot.pane_index,
            agent_alive: snapshot.agent_alive,
            signature: snapshot.signature.clone(),
            status: SessionStatus::Working,
            exit_code: None,
            goal: None,
            progress: None,
            links: Vec::new(),
            last_output_time: Instant::now(),
            last_content_hash: 0,
            alerted: false,
            spawned_here,
            tracked_at: Local::now(),
        }
    }

    /// 展示名：`[Agent] goal` 或回退到 pane 标识
    pub fn display_name(&self) -> String {
        let prefix = self
            .signature
            .as_ref()
            .map(|s| format!("[{}] ", s.name()))
            .unwrap_or_default();
        let body = self
            .goal
            .clone()
            .unwrap_or_else(|| format!("Session {}", self.pane_id));
        format!("{}{}", prefix, body)
    }
}

/// 会话注册表
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    spawned_pane_ids: HashSet<String>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            spawned_pane_ids: HashSet::new(),
        }
    }

    /// 标记一个由本工具创建的 pane，使其在发现不到时也不被驱逐
    ///
    /// 覆盖新 pane 里的代理进程尚未出现在进程树里的启动窗口期。
    pub fn track_spawned(&mut self, pane_id: &str) {
        info!(pane_id = %pane_id, "Tracking spawned pane");
        self.spawned_pane_ids.insert(pane_id.to_string());
    }

    /// 把本 tick 的发现结果合并进注册表
    ///
    /// - 已跟踪但不在发现集合且未受 spawn 保护的会话被驱逐
    /// - 新 pane 只有命中签名或受 spawn 保护才开始跟踪
    /// - 已跟踪的 pane 只刷新 liveness、签名和 pid
    pub fn reconcile(&mut self, discovered: &[PaneSnapshot]) {
        let current_ids: HashSet<&str> = discovered.iter().map(|s| s.pane_id.as_str()).collect();

        let stale: Vec<String> = self
            .sessions
            .keys()
            .filter(|id| !current_ids.contains(id.as_str()) && !self.spawned_pane_ids.contains(*id))
            .cloned()
            .collect();
        for pane_id in stale {
            debug!(pane_id = %pane_id, "Evicting vanished session");
            self.sessions.remove(&pane_id);
        }

        for snapshot in discovered {
            if let Some(existing) = self.sessions.get_mut(&snapshot.pane_id) {
                existing.agent_alive = snapshot.agent_alive;
                existing.pane_pid = snapshot.pane_pid;
                if snapshot.signature.is_some() {
                    existing.signature = snapshot.signature.clone();
                }
                continue;
            }

            let spawned = self.spawned_pane_ids.contains(&snapshot.pane_id);
            if snapshot.signature.is_none() && !spawned {
                continue;
            }

            info!(
                pane_id = %snapshot.pane_id,
                agent = snapshot.signature.as_ref().map(|s| s.name()).unwrap_or("-"),
                "Tracking new session"
            );
            self.sessions.insert(
                snapshot.pane_id.clone(),
                Session::from_snapshot(snapshot, spawned),
            );
        }
    }

    pub fn sessions(&self) -> &HashMap<String, Session> {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut HashMap<String, Session> {
        &mut self.sessions
    }

    pub fn get(&self, pane_id: &str) -> Option<&Session> {
        self.sessions.get(pane_id)
    }

    pub fn get_mut(&mut self, pane_id: &str) -> Option<&mut Session> {
        self.sessions.get_mut(pane_id)
    }

    pub fn pane_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
