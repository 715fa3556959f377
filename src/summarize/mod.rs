//! LLM 总结模块 - 带 TTL 缓存的会话内容总结
//!
//! 缓存按 pane 标识存放最近一次成功的总结；到期才重新调用
//! provider。provider 失败时保留上次结果并记日志，总结失败
//! 绝不允许打断轮询。

pub mod provider;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use provider::{build_provider, ProviderKind, SummaryProvider};

/// 总结 prompt 里最多带的终端内容字符数
const MAX_CONTENT_CHARS: usize = 3000;

/// 一次成功总结的结果
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub goal: String,
    pub progress: String,
    /// 代理是否在等用户输入
    pub needs_user: bool,
    pub created_at: Instant,
}

/// 构建发给 provider 的固定格式 prompt
pub fn build_prompt(content: &str) -> String {
    format!(
        "You are summarizing a terminal session running an AI coding assistant.\n\
         Given the terminal output below, extract:\n\
         1. **Goal**: The original task or goal (one short line)\n\
         2. **Progress**: Current progress or state (one short line)\n\
         3. **Needs user**: Is the agent waiting for user input? (yes/no)\n\
         \n\
         Respond in exactly this format:\n\
         Goal: <goal>\n\
         Progress: <progress>\n\
         Needs user: <yes or no>\n\
         \n\
         Terminal output:\n{}",
        tail_chars(content, MAX_CONTENT_CHARS)
    )
}

/// 取字符串最后 n 个字符，保持 UTF-8 边界
fn tail_chars(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// 宽容解析 provider 返回的 `Key: value` 行
///
/// 不认识的行直接忽略；缺失的 goal/progress 落为 "Unknown"；
/// needs_user 只认显式的肯定 token。解析永不失败。
pub fn parse_response(text: &str) -> SessionSummary {
    let mut goal = String::new();
    let mut progress = String::new();
    let mut needs_user = false;

    for line in text.trim().lines() {
        let line = line.trim();
        let lower = line.to_lowercase();
        let value = || line.splitn(2, ':').nth(1).unwrap_or("").trim().to_string();
        if lower.starts_with("goal:") {
            goal = value();
        } else if lower.starts_with("progress:") {
            progress = value();
        } else if lower.starts_with("needs user:") {
            needs_user = matches!(value().to_lowercase().as_str(), "yes" | "true" | "y");
        }
    }

    SessionSummary {
        goal: if goal.is_empty() { "Unknown".to_string() } else { goal },
        progress: if progress.is_empty() { "Unknown".to_string() } else { progress },
        needs_user,
        created_at: Instant::now(),
    }
}

/// 带 TTL 缓存的总结器
pub struct Summarizer {
    provider: Arc<dyn SummaryProvider>,
    interval: Duration,
    max_tokens: u32,
    cache: HashMap<String, SessionSummary>,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn SummaryProvider>, interval: Duration, max_tokens: u32) -> Self {
        Self {
            provider,
            interval,
            max_tokens,
            cache: HashMap::new(),
        }
    }

    /// 后台任务需要把 provider 带到工作线程里
    pub fn provider(&self) -> Arc<dyn SummaryProvider> {
        self.provider.clone()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// 没有缓存或缓存超过刷新间隔时返回 true
    pub fn should_refresh(&self, pane_id: &str) -> bool {
        match self.cache.get(pane_id) {
            Some(cached) => cached.created_at.elapsed() >= self.interval,
            None => true,
        }
    }

    pub fn get_cached(&self, pane_id: &str) -> Option<&SessionSummary> {
        self.cache.get(pane_id)
    }

    /// 同步总结：到期则调用 provider，否则原样返回缓存
    ///
    /// provider 出错时记日志并返回上一次的缓存（可能为 None），
    /// 绝不向上抛错。
    pub fn summarize(&mut self, pane_id: &str, content: &str) -> Option<&SessionSummary> {
        if self.should_refresh(pane_id) {
            let prompt = build_prompt(content);
            match self.provider.complete(&prompt, self.max_tokens) {
                Ok(text) => {
                    self.store_response(pane_id, &text);
                }
                Err(e) => {
                    warn!(pane_id = %pane_id, provider = %self.provider.name(), error = %e,
                        "Summarization failed, keeping previous summary");
                }
            }
        }
        self.cache.get(pane_id)
    }

    /// 存入一次 provider 响应（后台任务在下一个 tick 调用）
    pub fn store_response(&mut self, pane_id: &str, text: &str) {
        let summary = parse_response(text);
        debug!(pane_id = %pane_id, goal = %summary.goal, "Summary cached");
        self.cache.insert(pane_id.to_string(), summary);
    }

    /// 强制淘汰一个 pane 的缓存
    pub fn invalidate(&mut self, pane_id: &str) {
        self.cache.remove(pane_id);
    }
}
