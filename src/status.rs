//! 状态分类器 - 从终端内容和进程状态推断会话状态
//!
//! `classify` 是纯函数：相同输入永远得到相同输出，每个 tick 全量重算，
//! 不保存任何转移状态。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::signature::AgentSignature;

/// 会话状态，固定五种取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Working,
    Idle,
    NeedsAttention,
    Done,
    Crashed,
}

impl SessionStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            SessionStatus::Working => "🟢",
            SessionStatus::Idle => "🟡",
            SessionStatus::NeedsAttention => "🔴",
            SessionStatus::Done => "✅",
            SessionStatus::Crashed => "💀",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Working => "Working",
            SessionStatus::Idle => "Idle",
            SessionStatus::NeedsAttention => "Input",
            SessionStatus::Done => "Done",
            SessionStatus::Crashed => "Crashed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// 空闲判定阈值：输出超过这个时长没有变化视为 Idle
pub const IDLE_TIMEOUT_SECS: f64 = 30.0;

/// 状态判定只看最后这么多行
const TAIL_LINES: usize = 10;

/// 无签名时的兜底 attention 模式
static DEFAULT_ATTENTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\?\s*$",
        r"(?i)(?:Y/n|y/N|yes/no)",
        r"(?i)\(Y\)es.*\(N\)o",
        r"(?m)^[❯>›\$]\s*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// 无签名时的兜底 working 模式
static DEFAULT_WORKING_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]", r"\.{3,}", r"[█▓▒░]"]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
});

/// 从终端内容和进程状态推断会话状态
///
/// 判定顺序，先命中先生效：
/// 1. 进程已退出：非零退出码为 Crashed，否则 Done
/// 2. working 模式命中 → Working。working 必须先于 attention 检查：
///    有些 CLI 即使在后台工作时也常驻一个提示符（比如 Claude 的 ❯），
///    可见的 spinner/进度条说明代理正忙
/// 3. attention 模式命中 → NeedsAttention
/// 4. 输出超过 30 秒没有变化 → Idle
/// 5. 其余情况 → Working
pub fn classify(
    pane_content: &str,
    agent_alive: bool,
    exit_code: Option<i32>,
    last_output_time: Instant,
    now: Instant,
    signature: Option<&AgentSignature>,
) -> SessionStatus {
    if !agent_alive {
        return match exit_code {
            Some(code) if code != 0 => SessionStatus::Crashed,
            _ => SessionStatus::Done,
        };
    }

    let lines: Vec<&str> = pane_content.trim().lines().collect();
    let tail = if lines.is_empty() {
        String::new()
    } else {
        lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n")
    };

    let working: &[Regex] = signature
        .map(|s| s.working_patterns())
        .unwrap_or(&DEFAULT_WORKING_PATTERNS);
    if working.iter().any(|p| p.is_match(&tail)) {
        return SessionStatus::Working;
    }

    let attention: &[Regex] = signature
        .map(|s| s.attention_patterns())
        .unwrap_or(&DEFAULT_ATTENTION_PATTERNS);
    if attention.iter().any(|p| p.is_match(&tail)) {
        return SessionStatus::NeedsAttention;
    }

    let elapsed = now.saturating_duration_since(last_output_time);
    if elapsed.as_secs_f64() > IDLE_TIMEOUT_SECS {
        return SessionStatus::Idle;
    }

    SessionStatus::Working
}

/// 计算内容指纹，用于检测终端输出是否变化
pub fn content_fingerprint(content: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

/// 检查内容是否变化，返回 (是否变化, 新指纹)
pub fn content_changed(old_fingerprint: u64, content: &str) -> (bool, u64) {
    let new_fingerprint = content_fingerprint(content);
    (old_fingerprint != new_fingerprint, new_fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn classify_alive(content: &str, idle_for: Duration) -> SessionStatus {
        let now = Instant::now();
        classify(content, true, None, now - idle_for, now, None)
    }

    #[test]
    fn test_dead_process_exit_codes() {
        let now = Instant::now();
        // 非零退出码 → Crashed
        assert_eq!(
            classify("", false, Some(1), now, now, None),
            SessionStatus::Crashed
        );
        // 零退出码 → Done
        assert_eq!(
            classify("", false, Some(0), now, now, None),
            SessionStatus::Done
        );
        // 未知退出码 → Done
        assert_eq!(
            classify("", false, None, now, now, None),
            SessionStatus::Done
        );
    }

    #[test]
    fn test_spinner_means_working() {
        let status = classify_alive("⠙ Compacting conversation", Duration::ZERO);
        assert_eq!(status, SessionStatus::Working);
    }

    #[test]
    fn test_working_checked_before_attention() {
        // spinner 和裸提示符同时出现时必须判为 Working 而不是 NeedsAttention
        let content = "⠹ Running tests...\n❯\n";
        let status = classify_alive(content, Duration::ZERO);
        assert_eq!(status, SessionStatus::Working);
    }

    #[test]
    fn test_confirmation_prompt_needs_attention() {
        let status = classify_alive("Apply this change? (y/N)", Duration::ZERO);
        assert_eq!(status, SessionStatus::NeedsAttention);
    }

    #[test]
    fn test_bare_prompt_needs_attention() {
        let status = classify_alive("done editing\n❯\n", Duration::ZERO);
        assert_eq!(status, SessionStatus::NeedsAttention);
    }

    #[test]
    fn test_idle_boundary() {
        // 刚刚超过 30 秒 → Idle
        let status = classify_alive("plain output", Duration::from_micros(30_000_100));
        assert_eq!(status, SessionStatus::Idle);

        // 还差一点到 30 秒 → Working
        let status = classify_alive("plain output", Duration::from_micros(29_999_900));
        assert_eq!(status, SessionStatus::Working);
    }

    #[test]
    fn test_only_tail_lines_considered() {
        // attention 线索在第 11 行之前，不应该命中
        let mut content = String::from("Continue? (Y/n)\n");
        for i in 0..12 {
            content.push_str(&format!("line {}\n", i));
        }
        let status = classify_alive(&content, Duration::ZERO);
        assert_eq!(status, SessionStatus::Working);
    }

    #[test]
    fn test_signature_patterns_preferred_over_defaults() {
        use crate::signature::SignatureCatalog;

        let catalog = SignatureCatalog::builtin();
        let codex = catalog.find_by_name("Codex").unwrap();
        let now = Instant::now();

        // "executing" 只在 Codex 的 working 模式里
        let status = classify("executing cargo build", true, None, now, now, Some(codex.as_ref()));
        assert_eq!(status, SessionStatus::Working);

        // 默认模式不认识 "executing"
        let status = classify("executing cargo build", true, None, now, now, None);
        assert_eq!(status, SessionStatus::Working); // 30 秒内兜底仍是 Working

        let status = classify(
            "executing cargo build",
            true,
            None,
            now - Duration::from_secs(31),
            now,
            None,
        );
        assert_eq!(status, SessionStatus::Idle);
    }

    #[test]
    fn test_classify_is_pure() {
        let now = Instant::now();
        let last = now - Duration::from_secs(5);
        let a = classify("⠋ working", true, None, last, now, None);
        let b = classify("⠋ working", true, None, last, now, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_changed() {
        let (_, fp) = content_changed(0, "hello");
        let (changed, fp2) = content_changed(fp, "hello");
        assert!(!changed);
        assert_eq!(fp, fp2);

        let (changed, fp3) = content_changed(fp, "world");
        assert!(changed);
        assert_ne!(fp, fp3);
    }
}
