//! 通知引擎 - 检测值得告警的状态转移并维护 badge 计数
//!
//! 引擎只做判定和去重：每个 pane 记住上一次的状态，命中固定的
//! 可告警转移集合且本次 attention 周期尚未告警时才产出一条
//! "newly alerting"。响铃等副作用由调用方负责。

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::registry::Session;
use crate::status::SessionStatus;

/// 可告警的状态转移集合
const ALERT_TRANSITIONS: &[(SessionStatus, SessionStatus)] = &[
    (SessionStatus::Working, SessionStatus::NeedsAttention),
    (SessionStatus::Working, SessionStatus::Done),
    (SessionStatus::Working, SessionStatus::Crashed),
    (SessionStatus::Idle, SessionStatus::NeedsAttention),
    (SessionStatus::NeedsAttention, SessionStatus::Done),
];

/// 通知引擎
pub struct NotificationEngine {
    /// 每个 pane 上一个 tick 的状态
    previous: HashMap<String, SessionStatus>,
    /// 当前处于 attention 状态的 pane 集合，大小即 badge
    attention_panes: HashSet<String>,
}

impl NotificationEngine {
    pub fn new() -> Self {
        Self {
            previous: HashMap::new(),
            attention_panes: HashSet::new(),
        }
    }

    /// 当前需要用户关注的会话数量
    pub fn badge_count(&self) -> usize {
        self.attention_panes.len()
    }

    /// 清除一个会话的 attention 标记（比如用户已经跳转过去）
    ///
    /// 只从 badge 集合移除，不改动记住的上一状态，也不触碰会话上的
    /// alerted 标记 —— 同一个 attention 周期不会再次告警。
    pub fn clear_attention(&mut self, pane_id: &str) {
        self.attention_panes.remove(pane_id);
    }

    /// 检查所有会话的状态转移，返回本 tick 新告警的 pane 标识
    pub fn check_transitions(&mut self, sessions: &mut HashMap<String, Session>) -> Vec<String> {
        let mut newly_alerting = Vec::new();

        for (pane_id, session) in sessions.iter_mut() {
            let current = session.status;
            if let Some(prev) = self.previous.get(pane_id).copied() {
                let alertable = ALERT_TRANSITIONS.contains(&(prev, current));
                // alerted 标记只抑制同一 attention 周期内的重复告警；
                // Done/Crashed 是终态，转移本身天然只发生一次
                let suppressed = current == SessionStatus::NeedsAttention && session.alerted;
                if alertable && !suppressed {
                    debug!(pane_id = %pane_id, from = %prev, to = %current, "Session transition alert");
                    newly_alerting.push(pane_id.clone());
                    self.attention_panes.insert(pane_id.clone());
                    session.alerted = true;
                }
            }

            // 回到 Working 即结束当前 attention 周期
            if current == SessionStatus::Working {
                self.attention_panes.remove(pane_id);
                session.alerted = false;
            }

            self.previous.insert(pane_id.clone(), current);
        }

        // 清理不再被跟踪的 pane
        let active: HashSet<&str> = sessions.keys().map(|k| k.as_str()).collect();
        self.previous.retain(|id, _| active.contains(id.as_str()));
        self.attention_panes.retain(|id| active.contains(id.as_str()));

        newly_alerting
    }
}

impl Default for NotificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::PaneSnapshot;
    use crate::registry::SessionRegistry;
    use crate::signature::SignatureCatalog;

    /// 构造一个带单个会话的 map，并把状态设置为给定值
    fn sessions_with(entries: &[(&str, SessionStatus)]) -> HashMap<String, Session> {
        let catalog = SignatureCatalog::builtin();
        let mut registry = SessionRegistry::new();
        let snapshots: Vec<PaneSnapshot> = entries
            .iter()
            .map(|(id, _)| PaneSnapshot {
                pane_id: id.to_string(),
                pane_pid: 1,
                session_name: "main".to_string(),
                window_index: 0,
                pane_index: 0,
                agent_alive: true,
                signature: catalog.find_by_name("Claude"),
            })
            .collect();
        registry.reconcile(&snapshots);
        let mut map = registry.sessions().clone();
        for (id, status) in entries {
            map.get_mut(*id).unwrap().status = *status;
        }
        map
    }

    fn set_status(map: &mut HashMap<String, Session>, id: &str, status: SessionStatus) {
        map.get_mut(id).unwrap().status = status;
    }

    #[test]
    fn test_first_tick_never_alerts() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::NeedsAttention)]);

        // 没有上一状态，不告警
        assert!(engine.check_transitions(&mut sessions).is_empty());
        assert_eq!(engine.badge_count(), 0);
    }

    #[test]
    fn test_working_to_needs_attention_alerts_once() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::Working)]);

        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        let alerting = engine.check_transitions(&mut sessions);
        assert_eq!(alerting, vec!["p:0.0".to_string()]);
        assert_eq!(engine.badge_count(), 1);
        assert!(sessions["p:0.0"].alerted);

        // 连续第二个 NeedsAttention tick 不再告警
        let alerting = engine.check_transitions(&mut sessions);
        assert!(alerting.is_empty());
        assert_eq!(engine.badge_count(), 1);
    }

    #[test]
    fn test_needs_attention_to_done_still_alerts() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::Working)]);
        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        assert_eq!(engine.check_transitions(&mut sessions).len(), 1);

        // 之后转 Done 仍然告警一次（不同的允许转移）
        set_status(&mut sessions, "p:0.0", SessionStatus::Done);
        assert_eq!(engine.check_transitions(&mut sessions).len(), 1);

        // Done 保持不变则不再告警
        assert!(engine.check_transitions(&mut sessions).is_empty());
    }

    #[test]
    fn test_working_clears_attention_and_flag() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::Working)]);
        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        engine.check_transitions(&mut sessions);
        assert_eq!(engine.badge_count(), 1);

        // 回到 Working：badge 清零，alerted 标记复位
        set_status(&mut sessions, "p:0.0", SessionStatus::Working);
        engine.check_transitions(&mut sessions);
        assert_eq!(engine.badge_count(), 0);
        assert!(!sessions["p:0.0"].alerted);

        // 新的 attention 周期重新告警
        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        assert_eq!(engine.check_transitions(&mut sessions).len(), 1);
    }

    #[test]
    fn test_attention_flutter_does_not_realert() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::Working)]);
        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        engine.check_transitions(&mut sessions);

        // NeedsAttention → Idle → NeedsAttention 抖动，同一周期内不重复告警
        set_status(&mut sessions, "p:0.0", SessionStatus::Idle);
        assert!(engine.check_transitions(&mut sessions).is_empty());
        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        assert!(engine.check_transitions(&mut sessions).is_empty());
    }

    #[test]
    fn test_idle_to_needs_attention_alerts() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::Idle)]);
        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        assert_eq!(engine.check_transitions(&mut sessions).len(), 1);
    }

    #[test]
    fn test_badge_count_and_clear_attention() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[
            ("p:0.0", SessionStatus::Working),
            ("p:0.1", SessionStatus::Working),
        ]);
        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        set_status(&mut sessions, "p:0.1", SessionStatus::NeedsAttention);
        engine.check_transitions(&mut sessions);
        assert_eq!(engine.badge_count(), 2);

        // 清除一个，badge 正好减一
        engine.clear_attention("p:0.0");
        assert_eq!(engine.badge_count(), 1);

        // 清除不改变记住的状态：同周期不会再次告警
        assert!(engine.check_transitions(&mut sessions).is_empty());
        assert_eq!(engine.badge_count(), 1);
    }

    #[test]
    fn test_stale_panes_purged() {
        let mut engine = NotificationEngine::new();
        let mut sessions = sessions_with(&[("p:0.0", SessionStatus::Working)]);
        engine.check_transitions(&mut sessions);

        set_status(&mut sessions, "p:0.0", SessionStatus::NeedsAttention);
        engine.check_transitions(&mut sessions);
        assert_eq!(engine.badge_count(), 1);

        // pane 不再被跟踪后，badge 和记忆都清理掉
        let mut empty: HashMap<String, Session> = HashMap::new();
        engine.check_transitions(&mut empty);
        assert_eq!(engine.badge_count(), 0);
    }
}
