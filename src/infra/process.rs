//! 进程树检查模块 - 基于 sysinfo 的进程枚举与签名匹配

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use sysinfo::{Pid, ProcessStatus, System};

use super::ProcessProbe;
use crate::signature::{AgentSignature, SignatureCatalog};

/// sysinfo 实现的进程探测器
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self { system }
    }
}

impl ProcessProbe for SysinfoProbe {
    fn refresh(&mut self) {
        self.system.refresh_all();
    }

    /// 宽度优先遍历 root_pid 的进程树，对每个进程的名称和完整命令行
    /// 做签名匹配，返回树序的首个命中
    fn find_signature_in_tree(
        &self,
        root_pid: u32,
        catalog: &SignatureCatalog,
    ) -> Option<Arc<AgentSignature>> {
        // 先按 parent 关系索引一遍，避免每层全表扫描
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut queue = VecDeque::from([Pid::from_u32(root_pid)]);
        while let Some(pid) = queue.pop_front() {
            if let Some(process) = self.system.process(pid) {
                let name = process.name().to_string_lossy().to_string();
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                if let Some(sig) = catalog.match_process(&name, &cmdline) {
                    return Some(sig);
                }
            }
            if let Some(kids) = children.get(&pid) {
                queue.extend(kids.iter().copied());
            }
        }
        None
    }

    fn is_alive(&self, pid: u32) -> bool {
        match self.system.process(Pid::from_u32(pid)) {
            Some(process) => !matches!(process.status(), ProcessStatus::Zombie),
            None => false,
        }
    }

    /// 退出码只有在本进程收割了目标子进程时才可观测。
    /// 被监控的 pane 进程不是我们的子进程，这里统一报告 None，
    /// 分类器会将其归为 Done 而非 Crashed。
    fn exit_code(&self, _pid: u32) -> Option<i32> {
        None
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        let probe = SysinfoProbe::new();
        assert!(probe.is_alive(std::process::id()));
    }

    #[test]
    fn test_nonexistent_pid_not_alive() {
        let probe = SysinfoProbe::new();
        // pid 0 永远不会是用户进程
        assert!(!probe.is_alive(0));
    }

    #[test]
    fn test_find_signature_in_tree_no_match_for_self() {
        // 测试进程树里不应该有编码代理
        let probe = SysinfoProbe::new();
        let catalog = SignatureCatalog::builtin();
        assert!(probe
            .find_signature_in_tree(std::process::id(), &catalog)
            .is_none());
    }
}
