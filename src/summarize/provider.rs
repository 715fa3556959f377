//! 总结 provider - 多后端 LLM 调用与自动选择
//!
//! 所有后端实现同一个 `SummaryProvider` trait，缓存层对后端差异
//! 完全无感。auto 模式按固定顺序探测可用后端，每个探测都有
//! 不可忽略的延迟，所以结果在进程生命周期内只算一次。
//!
//! API Key 读取优先级：
//! 1. 配置文件 `~/.config/tmux-agent-monitor/config.json` 的 `summary.api_key`
//! 2. 环境变量 `ANTHROPIC_API_KEY`
//! 3. 环境变量 `OPENAI_API_KEY`

use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::SummaryConfig;

/// Anthropic Messages API 地址
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API 版本
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// OpenAI chat completions API 地址
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Ollama 本地回环服务的 OpenAI 兼容地址
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// 各后端的默认模型
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-haiku-4-5-20251001";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";

/// 请求超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// 回环服务探测的连接超时
const LOOPBACK_PROBE_TIMEOUT_MS: u64 = 500;

/// 单次 LLM 补全调用
///
/// 实现方负责自己的超时；错误原样向上返回，由缓存层降级。
pub trait SummaryProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// 总结后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Auto,
    OnDevice,
    Ollama,
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    /// 从配置字符串解析，未知取值回退 Auto
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "auto" | "" => ProviderKind::Auto,
            "on-device" | "apple" => ProviderKind::OnDevice,
            "ollama" => ProviderKind::Ollama,
            "openai" => ProviderKind::OpenAi,
            "anthropic" => ProviderKind::Anthropic,
            other => {
                warn!(provider = %other, "Unknown summary provider, falling back to auto");
                ProviderKind::Auto
            }
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProviderKind::Auto => "auto",
            ProviderKind::OnDevice => "on-device",
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        };
        write!(f, "{}", name)
    }
}

// ──────────────────────────────────────────────────────────────────
// Anthropic
// ──────────────────────────────────────────────────────────────────

/// Messages API 请求体
#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

/// Messages API 响应体
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Anthropic Messages API 后端
pub struct AnthropicProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| anyhow!("Cannot create HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
            model: model.unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_string()),
        })
    }
}

impl SummaryProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!(model = %self.model, prompt_len = prompt.len(), "Sending request to Anthropic API");

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| anyhow!("API request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| anyhow!("Failed to read response: {}", e))?;

        if !status.is_success() {
            if let Ok(error_resp) = serde_json::from_str::<ErrorResponse>(&body) {
                return Err(anyhow!("API error ({}): {}", status, error_resp.error.message));
            }
            return Err(anyhow!("API error ({}): {}", status, body));
        }

        let response: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse response: {}", e))?;

        Ok(response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_ref())
            .cloned()
            .collect::<Vec<String>>()
            .join(""))
    }
}

// ──────────────────────────────────────────────────────────────────
// OpenAI 兼容（OpenAI 本体和 Ollama 共用）
// ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    content: Option<String>,
}

/// OpenAI 兼容 chat completions 后端
pub struct OpenAiCompatProvider {
    client: reqwest::blocking::Client,
    api_key: String,
    base_url: String,
    model: String,
    name: &'static str,
}

impl OpenAiCompatProvider {
    pub fn openai(api_key: String, base_url: Option<String>, model: Option<String>) -> Result<Self> {
        Self::build(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| OPENAI_API_URL.to_string()),
            model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        )
    }

    /// Ollama 不校验 key，给一个占位值即可
    pub fn ollama(base_url: Option<String>, model: Option<String>) -> Result<Self> {
        Self::build(
            "ollama",
            "ollama".to_string(),
            base_url.unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            model.unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
        )
    }

    fn build(name: &'static str, api_key: String, base_url: String, model: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .build()
            .map_err(|e| anyhow!("Cannot create HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            name,
        })
    }
}

impl SummaryProvider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, url = %url, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|e| anyhow!("API request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| anyhow!("Failed to read response: {}", e))?;

        if !status.is_success() {
            return Err(anyhow!("API error ({}): {}", status, body));
        }

        let response: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Failed to parse response: {}", e))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Empty chat completion response"))
    }
}

// ──────────────────────────────────────────────────────────────────
// 端侧推理（外部 wrapper 子进程）
// ──────────────────────────────────────────────────────────────────

/// 端侧推理后端 - 把 prompt 交给一个本地 wrapper 命令
///
/// wrapper 约定：`<cmd> --check` 退出码 0 表示能力可用；
/// `<cmd> <prompt>` 在 stdout 输出补全文本。
pub struct OnDeviceProvider {
    command: Vec<String>,
}

impl OnDeviceProvider {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("On-device wrapper command not configured"));
        }
        Ok(Self { command })
    }

    /// 实际跑一次 capability check，不信任 OS 版本号
    pub fn capability_check(command: &[String]) -> bool {
        let Some((program, args)) = command.split_first() else {
            return false;
        };
        Command::new(program)
            .args(args)
            .arg("--check")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }
}

impl SummaryProvider for OnDeviceProvider {
    fn name(&self) -> &'static str {
        "on-device"
    }

    fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("On-device wrapper command not configured"))?;

        let output = Command::new(program)
            .args(args)
            .arg(prompt)
            .output()
            .map_err(|e| anyhow!("Cannot run on-device wrapper: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("On-device wrapper failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

// ──────────────────────────────────────────────────────────────────
// 自动选择
// ──────────────────────────────────────────────────────────────────

/// 从 API key 前缀推断后端类型
pub fn kind_from_api_key(api_key: &str) -> Option<ProviderKind> {
    if api_key.starts_with("sk-ant-") {
        Some(ProviderKind::Anthropic)
    } else if api_key.starts_with("sk-") {
        Some(ProviderKind::OpenAi)
    } else {
        None
    }
}

fn resolve_api_key(config: &SummaryConfig) -> Option<String> {
    if let Some(key) = config.api_key.as_ref().filter(|k| !k.is_empty()) {
        return Some(key.clone());
    }
    for var in ["ANTHROPIC_API_KEY", "OPENAI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                debug!(var = %var, "Using API key from environment");
                return Some(key);
            }
        }
    }
    None
}

/// 端侧推理是否可用：先看 OS 版本门槛，再实际跑 capability check
fn on_device_available(config: &SummaryConfig) -> bool {
    if std::env::consts::OS != "macos" {
        return false;
    }
    let major = sysinfo::System::kernel_version()
        .and_then(|v| v.split('.').next().and_then(|m| m.parse::<u64>().ok()))
        .unwrap_or(0);
    if major < config.on_device_os_major {
        return false;
    }
    OnDeviceProvider::capability_check(&config.on_device_command)
}

/// 本地回环推理服务是否在监听
fn loopback_server_available() -> bool {
    let Ok(client) = reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(LOOPBACK_PROBE_TIMEOUT_MS))
        .build()
    else {
        return false;
    };
    client.get("http://127.0.0.1:11434/").send().is_ok()
}

/// 按固定顺序探测一次最优后端
///
/// 顺序：端侧推理 → 本地回环服务 → API key 前缀 → Anthropic 兜底。
pub fn detect_provider(config: &SummaryConfig) -> ProviderKind {
    if on_device_available(config) {
        info!("Auto-detected on-device inference capability");
        return ProviderKind::OnDevice;
    }
    if loopback_server_available() {
        info!("Auto-detected local inference server on :11434");
        return ProviderKind::Ollama;
    }
    if let Some(kind) = resolve_api_key(config).and_then(|key| kind_from_api_key(&key)) {
        info!(provider = %kind, "Auto-detected provider from API key prefix");
        return kind;
    }
    ProviderKind::Anthropic
}

/// 探测有不可忽略的延迟，进程生命周期内只算一次
static AUTO_KIND: OnceLock<ProviderKind> = OnceLock::new();

/// 构建配置指定的后端；Auto 走一次性自动探测
pub fn build_provider(config: &SummaryConfig) -> Result<Arc<dyn SummaryProvider>> {
    let mut kind = ProviderKind::parse(&config.provider);
    if kind == ProviderKind::Auto {
        kind = *AUTO_KIND.get_or_init(|| detect_provider(config));
    }

    let api_key = resolve_api_key(config).unwrap_or_default();
    let provider: Arc<dyn SummaryProvider> = match kind {
        ProviderKind::OnDevice => Arc::new(OnDeviceProvider::new(config.on_device_command.clone())?),
        ProviderKind::Ollama => Arc::new(OpenAiCompatProvider::ollama(
            config.base_url.clone(),
            config.model.clone(),
        )?),
        ProviderKind::OpenAi => Arc::new(OpenAiCompatProvider::openai(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
        )?),
        ProviderKind::Anthropic | ProviderKind::Auto => Arc::new(AnthropicProvider::new(
            api_key,
            config.base_url.clone(),
            config.model.clone(),
        )?),
    };

    info!(provider = %provider.name(), "Summary provider ready");
    Ok(provider)
}
