//! 会话 spawner - 在 tmux 里拉起新的编码代理会话

use anyhow::{Context, Result};
use tracing::info;

use crate::config::MonitorConfig;
use crate::infra::TmuxManager;

/// 把任务描述转成 tmux 友好的 window 名
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    let truncated: String = slug.chars().take(40).collect();
    let truncated = truncated.trim_matches('-').to_string();
    if truncated.is_empty() {
        "session".to_string()
    } else {
        truncated
    }
}

/// 单引号 shell 转义
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// 会话 spawner
pub struct Spawner {
    tmux: TmuxManager,
}

impl Spawner {
    pub fn new(tmux: TmuxManager) -> Self {
        Self { tmux }
    }

    /// 在配置的 tmux session 里新开 window 运行代理，goal 作为初始 prompt
    ///
    /// 返回新 pane 的标识，调用方应立即对其 `track_spawned`。
    pub fn spawn_agent(
        &self,
        config: &MonitorConfig,
        working_dir: &str,
        goal: &str,
        extra_args: &[String],
    ) -> Result<String> {
        let session_name = &config.tmux_session;
        if !self.tmux.has_session(session_name) {
            self.tmux
                .create_session(session_name)
                .context("Cannot create tmux session for spawned agent")?;
        }

        let mut args: Vec<String> = config.default_agent_args.clone();
        args.extend(extra_args.iter().cloned());
        let args_str = args.join(" ");

        let command = format!(
            "cd {} && {} {} -p {}",
            shell_quote(working_dir),
            config.agent_command,
            args_str,
            shell_quote(goal),
        );

        let window_name = slugify(goal);
        let pane_id = self.tmux.new_window(session_name, &window_name, &command)?;

        info!(pane_id = %pane_id, window = %window_name, "Agent session spawned");
        Ok(pane_id)
    }
}
