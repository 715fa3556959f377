//! 会话发现 - 枚举 tmux pane 并匹配编码代理签名

use std::sync::Arc;

use tracing::debug;

use crate::infra::{PaneBackend, ProcessProbe};
use crate::signature::{AgentSignature, SignatureCatalog};

/// 每个 tick 为每个 pane 生成的一次性快照，不跨 tick 保留
#[derive(Debug, Clone)]
pub struct PaneSnapshot {
    /// pane 标识，形如 `session:window.pane`，同一时刻全局唯一
    pub pane_id: String,
    pub pane_pid: u32,
    pub session_name: String,
    pub window_index: u32,
    pub pane_index: u32,
    /// 树中是否有存活的代理进程
    pub agent_alive: bool,
    /// 命中的签名
    pub signature: Option<Arc<AgentSignature>>,
}

/// pane 发现器 - 只读，无副作用
pub struct Discovery {
    catalog: Arc<SignatureCatalog>,
}

impl Discovery {
    pub fn new(catalog: Arc<SignatureCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &SignatureCatalog {
        &self.catalog
    }

    /// 枚举所有 pane 并在各自的进程树中匹配签名
    ///
    /// 枚举失败时返回空列表，本 tick 按无数据处理，绝不向上抛错。
    pub fn discover(&self, panes: &dyn PaneBackend, probe: &dyn ProcessProbe) -> Vec<PaneSnapshot> {
        let infos = match panes.list_panes() {
            Ok(infos) => infos,
            Err(e) => {
                debug!(error = %e, "Pane listing failed, skipping tick");
                return Vec::new();
            }
        };

        infos
            .into_iter()
            .map(|info| {
                let signature = probe.find_signature_in_tree(info.pane_pid, &self.catalog);
                PaneSnapshot {
                    pane_id: info.pane_id,
                    pane_pid: info.pane_pid,
                    session_name: info.session_name,
                    window_index: info.window_index,
                    pane_index: info.pane_index,
                    agent_alive: signature.is_some(),
                    signature,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::PaneInfo;
    use anyhow::anyhow;

    struct FakePanes {
        panes: Vec<PaneInfo>,
        fail: bool,
    }

    impl PaneBackend for FakePanes {
        fn list_panes(&self) -> anyhow::Result<Vec<PaneInfo>> {
            if self.fail {
                Err(anyhow!("tmux not running"))
            } else {
                Ok(self.panes.clone())
            }
        }

        fn capture_pane(&self, _pane_id: &str, _lines: u32) -> String {
            String::new()
        }
    }

    struct FakeProbe {
        /// 命中签名的 pid 列表
        agent_pids: Vec<u32>,
    }

    impl ProcessProbe for FakeProbe {
        fn refresh(&mut self) {}

        fn find_signature_in_tree(
            &self,
            root_pid: u32,
            catalog: &SignatureCatalog,
        ) -> Option<Arc<AgentSignature>> {
            if self.agent_pids.contains(&root_pid) {
                catalog.find_by_name("Claude")
            } else {
                None
            }
        }

        fn is_alive(&self, _pid: u32) -> bool {
            true
        }

        fn exit_code(&self, _pid: u32) -> Option<i32> {
            None
        }
    }

    fn pane(id: &str, pid: u32) -> PaneInfo {
        let snapshot = crate::infra::TmuxManager::parse_pane_line(&format!("{} {}", id, pid));
        snapshot.unwrap()
    }

    #[test]
    fn test_discover_matches_signatures() {
        let discovery = Discovery::new(Arc::new(SignatureCatalog::builtin()));
        let panes = FakePanes {
            panes: vec![pane("main:0.0", 100), pane("main:0.1", 200)],
            fail: false,
        };
        let probe = FakeProbe { agent_pids: vec![200] };

        let snapshots = discovery.discover(&panes, &probe);
        assert_eq!(snapshots.len(), 2);

        // 未命中的 pane 仍然有快照，liveness 照常记录
        assert!(!snapshots[0].agent_alive);
        assert!(snapshots[0].signature.is_none());

        assert!(snapshots[1].agent_alive);
        assert_eq!(snapshots[1].signature.as_ref().unwrap().name(), "Claude");
    }

    #[test]
    fn test_listing_failure_yields_empty() {
        let discovery = Discovery::new(Arc::new(SignatureCatalog::builtin()));
        let panes = FakePanes { panes: vec![], fail: true };
        let probe = FakeProbe { agent_pids: vec![] };

        assert!(discovery.discover(&panes, &probe).is_empty());
    }
}
