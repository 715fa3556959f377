//! 配置加载 - JSON 配置文件加默认值，环境变量可覆盖关键项
//!
//! 配置文件：`~/.config/tmux-agent-monitor/config.json`。
//! 文件缺失或损坏都按默认值处理并告警，配置问题不允许让启动失败；
//! 自定义 agent/link 条目里的错误在构建目录/注册表时逐条跳过。

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::links::CustomLinkConfig;
use crate::signature::CustomAgentConfig;

/// 总结相关配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// 后端："auto" / "on-device" / "ollama" / "openai" / "anthropic"
    pub provider: String,
    pub model: Option<String>,
    /// 总结刷新间隔（秒）
    pub interval_secs: u64,
    pub max_tokens: u32,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    /// 端侧推理 wrapper 命令（argv 形式）
    pub on_device_command: Vec<String>,
    /// 端侧推理要求的最低内核主版本。不同机器上观察到的门槛并不
    /// 一致，所以做成配置而不是写死
    pub on_device_os_major: u64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            model: None,
            interval_secs: 60,
            max_tokens: 200,
            api_key: None,
            base_url: None,
            on_device_command: vec!["afm".to_string()],
            on_device_os_major: 24,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 状态判定时捕获的行数
    pub capture_lines: u32,
    /// 总结时捕获的行数（需要更多上下文）
    pub summary_capture_lines: u32,
    /// 有新告警时是否响终端铃
    pub ring_bell: bool,
    /// spawn 新会话时使用的 tmux session 名
    pub tmux_session: String,
    /// spawn 新会话时运行的代理命令
    pub agent_command: String,
    pub default_agent_args: Vec<String>,
    pub summary: SummaryConfig,
    pub agents: Vec<CustomAgentConfig>,
    pub links: Vec<CustomLinkConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 3,
            capture_lines: 50,
            summary_capture_lines: 200,
            ring_bell: true,
            tmux_session: "tam".to_string(),
            agent_command: "claude".to_string(),
            default_agent_args: Vec::new(),
            summary: SummaryConfig::default(),
            agents: Vec::new(),
            links: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/tmux-agent-monitor/config.json"))
    }

    /// 从默认路径加载配置，然后套用环境变量覆盖
    pub fn load() -> Self {
        let mut config = match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        };
        config.apply_env_overrides();
        config
    }

    /// 从指定路径加载；文件缺失或解析失败都降级为默认值
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<MonitorConfig>(&content) {
                Ok(config) => {
                    debug!(path = %path.display(), "Config loaded");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read config, using defaults");
                Self::default()
            }
        }
    }

    /// 环境变量覆盖配置文件
    fn apply_env_overrides(&mut self) {
        if let Ok(interval) = std::env::var("TAM_POLL_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.poll_interval_secs = secs;
            }
        }
        if let Ok(interval) = std::env::var("TAM_SUMMARY_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.summary.interval_secs = secs;
            }
        }
        if let Ok(model) = std::env::var("TAM_SUMMARY_MODEL") {
            if !model.is_empty() {
                self.summary.model = Some(model);
            }
        }
        if let Ok(provider) = std::env::var("TAM_SUMMARY_PROVIDER") {
            if !provider.is_empty() {
                self.summary.provider = provider;
            }
        }
        if let Ok(command) = std::env::var("TAM_AGENT_COMMAND") {
            if !command.is_empty() {
                self.agent_command = command;
            }
        }
    }
}
