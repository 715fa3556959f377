//! tmux 管理模块 - 封装 tmux 操作

use anyhow::{anyhow, Result};
use std::process::Command;
use tracing::{debug, error, info, warn};

use super::{PaneBackend, PaneInfo};

/// `tmux list-panes` 使用的输出格式
const PANE_FORMAT: &str = "#{session_name}:#{window_index}.#{pane_index} #{pane_pid}";

/// tmux 管理器
pub struct TmuxManager;

impl TmuxManager {
    pub fn new() -> Self {
        Self
    }

    /// 解析 list-panes 的一行输出，格式不符的行返回 None
    pub(crate) fn parse_pane_line(line: &str) -> Option<PaneInfo> {
        let line = line.trim();
        let (pane_id, pid_str) = line.split_once(' ')?;
        let pane_pid: u32 = pid_str.trim().parse().ok()?;

        // pane_id 形如 "session:window.pane"
        let (session_part, pane_str) = pane_id.rsplit_once('.')?;
        let (session_name, window_str) = session_part.split_once(':')?;
        let window_index: u32 = window_str.parse().ok()?;
        let pane_index: u32 = pane_str.parse().ok()?;

        Some(PaneInfo {
            pane_id: pane_id.to_string(),
            pane_pid,
            session_name: session_name.to_string(),
            window_index,
            pane_index,
        })
    }

    /// 检查 session 是否存在
    pub fn has_session(&self, session_name: &str) -> bool {
        Command::new("tmux")
            .args(["has-session", "-t", session_name])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// 创建新的 detached session
    pub fn create_session(&self, session_name: &str) -> Result<()> {
        debug!(session = %session_name, "Creating tmux session");

        let status = Command::new("tmux")
            .args(["new-session", "-d", "-s", session_name])
            .status()?;

        if status.success() {
            info!(session = %session_name, "Tmux session created");
            Ok(())
        } else {
            error!(session = %session_name, "Failed to create tmux session");
            Err(anyhow!("Failed to create tmux session: {}", session_name))
        }
    }

    /// 在 session 中新建 window 运行命令，返回新 pane 的标识
    pub fn new_window(&self, session_name: &str, window_name: &str, command: &str) -> Result<String> {
        debug!(session = %session_name, window = %window_name, "Opening tmux window");

        let output = Command::new("tmux")
            .args([
                "new-window",
                "-t", session_name,
                "-n", window_name,
                "-P",
                "-F", "#{session_name}:#{window_index}.#{pane_index}",
                command,
            ])
            .output()?;

        if !output.status.success() {
            error!(session = %session_name, window = %window_name, "Failed to open tmux window");
            return Err(anyhow!("Failed to open window in session: {}", session_name));
        }

        let pane_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if pane_id.is_empty() {
            return Err(anyhow!("tmux returned no pane id for new window"));
        }

        info!(pane_id = %pane_id, "Tmux window opened");
        Ok(pane_id)
    }

    /// 终止 session
    pub fn kill_session(&self, session_name: &str) -> Result<()> {
        debug!(session = %session_name, "Killing tmux session");

        let status = Command::new("tmux")
            .args(["kill-session", "-t", session_name])
            .status()?;

        if status.success() {
            info!(session = %session_name, "Tmux session killed");
            Ok(())
        } else {
            error!(session = %session_name, "Failed to kill tmux session");
            Err(anyhow!("Failed to kill session: {}", session_name))
        }
    }
}

impl PaneBackend for TmuxManager {
    /// 列出所有 session 的所有 pane
    fn list_panes(&self) -> Result<Vec<PaneInfo>> {
        let output = Command::new("tmux")
            .args(["list-panes", "-a", "-F", PANE_FORMAT])
            .output()?;

        if !output.status.success() {
            // 没有任何 session 时 tmux 会报错，按空列表处理
            return Ok(Vec::new());
        }

        let panes: Vec<PaneInfo> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(Self::parse_pane_line)
            .collect();
        Ok(panes)
    }

    /// 捕获 pane 的最后 N 行终端输出
    fn capture_pane(&self, pane_id: &str, lines: u32) -> String {
        let output = Command::new("tmux")
            .args([
                "capture-pane",
                "-t", pane_id,
                "-p",
                "-S", &format!("-{}", lines),
            ])
            .output();

        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).to_string(),
            Ok(_) => {
                warn!(pane_id = %pane_id, "Failed to capture pane");
                String::new()
            }
            Err(e) => {
                warn!(pane_id = %pane_id, error = %e, "Cannot run tmux capture-pane");
                String::new()
            }
        }
    }
}

impl Default for TmuxManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pane_line() {
        let pane = TmuxManager::parse_pane_line("main:0.1 12345").unwrap();
        assert_eq!(pane.pane_id, "main:0.1");
        assert_eq!(pane.pane_pid, 12345);
        assert_eq!(pane.session_name, "main");
        assert_eq!(pane.window_index, 0);
        assert_eq!(pane.pane_index, 1);
    }

    #[test]
    fn test_parse_pane_line_session_name_with_colon_like_parts() {
        // session 名里出现 '.' 时 rsplit 保证 pane index 仍然正确
        let pane = TmuxManager::parse_pane_line("work:3.2 999").unwrap();
        assert_eq!(pane.session_name, "work");
        assert_eq!(pane.window_index, 3);
        assert_eq!(pane.pane_index, 2);
    }

    #[test]
    fn test_parse_pane_line_malformed() {
        // 缺 pid
        assert!(TmuxManager::parse_pane_line("main:0.1").is_none());
        // pid 不是数字
        assert!(TmuxManager::parse_pane_line("main:0.1 abc").is_none());
        // 缺坐标
        assert!(TmuxManager::parse_pane_line("main 123").is_none());
        // 空行
        assert!(TmuxManager::parse_pane_line("").is_none());
    }
}
