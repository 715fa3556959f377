//! Agent 签名目录 - 识别编码代理进程及其终端状态线索
//!
//! 每个签名包含三部分：进程匹配 token（对进程名/命令行做大小写无关的
//! 子串匹配）、attention 模式（代理在等待用户输入）、working 模式
//! （代理正在工作）。内置签名覆盖常见的编码代理 CLI，用户可以通过
//! 配置追加自定义签名。

use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

/// 一个已知编码代理的签名，构建后不可变
#[derive(Debug)]
pub struct AgentSignature {
    name: String,
    process_tokens: Vec<String>,
    attention_patterns: Vec<Regex>,
    working_patterns: Vec<Regex>,
}

impl AgentSignature {
    fn from_literals(
        name: &str,
        process_tokens: &[&str],
        attention: &[&str],
        working: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            process_tokens: process_tokens.iter().map(|t| t.to_lowercase()).collect(),
            attention_patterns: compile_patterns(attention),
            working_patterns: compile_patterns(working),
        }
    }

    /// 代理名称（如 "Claude"、"Codex"）
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attention_patterns(&self) -> &[Regex] {
        &self.attention_patterns
    }

    pub fn working_patterns(&self) -> &[Regex] {
        &self.working_patterns
    }

    /// 检查进程名或命令行是否命中任意一个 token
    ///
    /// 输入应已转换为小写，token 在构建时统一为小写。
    pub fn matches_process(&self, name_lower: &str, cmdline_lower: &str) -> bool {
        self.process_tokens
            .iter()
            .any(|t| name_lower.contains(t.as_str()) || cmdline_lower.contains(t.as_str()))
    }
}

/// 用户自定义签名的配置条目（由配置层预解析后传入）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CustomAgentConfig {
    pub name: String,
    pub process_tokens: Vec<String>,
    pub attention_patterns: Vec<String>,
    pub working_patterns: Vec<String>,
}

/// 编译一组字面模式，无效的直接丢弃
fn compile_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// 常见的 braille spinner 字符集
const SPINNER: &str = "⠋|⠙|⠹|⠸|⠼|⠴|⠦|⠧|⠇|⠏";

/// 构建全部内置签名，目录顺序即匹配优先级
fn builtin_signatures() -> Vec<AgentSignature> {
    vec![
        AgentSignature::from_literals(
            "Claude",
            &["claude"],
            &[
                r"\?\s*$",
                r"(?i)(?:Y/n|y/N|yes/no)",
                r"(?i)\(Y\)es.*\(N\)o",
                r"(?m)^[❯>›]\s*$",
                r"(?i)Do you want to proceed",
            ],
            &[SPINNER, r"\.{3,}", r"█|▓|▒|░"],
        ),
        AgentSignature::from_literals(
            "OpenCode",
            &["opencode"],
            &[
                r"\?\s*$",
                r"(?i)(?:Y/n|y/N|yes/no)",
                r"(?m)^[❯>›\$]\s*$",
                r"(?i)Enter.*to continue",
                r"(?i)waiting for input",
            ],
            &[SPINNER, r"(?i)thinking|generating|processing", r"█|▓|▒|░"],
        ),
        AgentSignature::from_literals(
            "Codex",
            &["codex"],
            &[
                r"\?\s*$",
                r"(?i)(?:Y/n|y/N|yes/no)",
                r"(?m)^[❯>›\$]\s*$",
                r"(?i)approve|reject|deny",
            ],
            &[SPINNER, r"(?i)running|executing|reading", r"█|▓|▒|░"],
        ),
        AgentSignature::from_literals(
            "Aider",
            &["aider"],
            &[
                r"\?\s*$",
                r"(?i)(?:Y/n|y/N|yes/no)",
                r"(?m)^[❯>›\$]\s*$",
                r"(?m)^aider>",
            ],
            &[SPINNER, r"(?i)Tokens:|Model:"],
        ),
        AgentSignature::from_literals(
            "Gemini",
            &["gemini", "antigravity"],
            &[
                r"\?\s*$",
                r"(?i)(?:Y/n|y/N|yes/no)",
                r"(?m)^[❯>›\$]\s*$",
                r"(?i)Do you want to proceed",
                r"(?i)waiting for approval",
            ],
            &[SPINNER, r"\.{3,}", r"█|▓|▒|░", r"(?i)Generating|Thinking|Planning"],
        ),
    ]
}

/// 签名目录 - 内置签名在前，自定义签名在后，按顺序首个命中生效
pub struct SignatureCatalog {
    signatures: Vec<Arc<AgentSignature>>,
}

impl SignatureCatalog {
    /// 只包含内置签名的目录
    pub fn builtin() -> Self {
        Self {
            signatures: builtin_signatures().into_iter().map(Arc::new).collect(),
        }
    }

    /// 内置签名加用户自定义签名
    ///
    /// 自定义条目中无效的正则会被跳过并告警，配置错误不会让启动失败。
    pub fn with_custom(custom: &[CustomAgentConfig]) -> Self {
        let mut catalog = Self::builtin();
        for cfg in custom {
            if cfg.name.is_empty() || cfg.process_tokens.is_empty() {
                warn!(name = %cfg.name, "Skipping custom agent without name or process tokens");
                continue;
            }
            let mut attention = Vec::new();
            for p in &cfg.attention_patterns {
                match Regex::new(p) {
                    Ok(re) => attention.push(re),
                    Err(e) => warn!(agent = %cfg.name, pattern = %p, error = %e, "Skipping invalid attention pattern"),
                }
            }
            let mut working = Vec::new();
            for p in &cfg.working_patterns {
                match Regex::new(p) {
                    Ok(re) => working.push(re),
                    Err(e) => warn!(agent = %cfg.name, pattern = %p, error = %e, "Skipping invalid working pattern"),
                }
            }
            catalog.signatures.push(Arc::new(AgentSignature {
                name: cfg.name.clone(),
                process_tokens: cfg.process_tokens.iter().map(|t| t.to_lowercase()).collect(),
                attention_patterns: attention,
                working_patterns: working,
            }));
        }
        catalog
    }

    pub fn signatures(&self) -> &[Arc<AgentSignature>] {
        &self.signatures
    }

    /// 用进程名和完整命令行匹配签名，返回目录顺序的首个命中
    pub fn match_process(&self, process_name: &str, cmdline: &str) -> Option<Arc<AgentSignature>> {
        let name_lower = process_name.to_lowercase();
        let cmdline_lower = cmdline.to_lowercase();
        self.signatures
            .iter()
            .find(|s| s.matches_process(&name_lower, &cmdline_lower))
            .cloned()
    }

    /// 按代理名称查找签名
    pub fn find_by_name(&self, name: &str) -> Option<Arc<AgentSignature>> {
        self.signatures
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

impl Default for SignatureCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_has_known_agents() {
        let catalog = SignatureCatalog::builtin();
        for name in ["Claude", "OpenCode", "Codex", "Aider", "Gemini"] {
            assert!(catalog.find_by_name(name).is_some(), "missing {}", name);
        }
    }

    #[test]
    fn test_match_process_case_insensitive_substring() {
        let catalog = SignatureCatalog::builtin();

        // 进程名命中
        let sig = catalog.match_process("Claude", "").unwrap();
        assert_eq!(sig.name(), "Claude");

        // 命令行命中
        let sig = catalog.match_process("node", "/usr/local/bin/CODEX --resume abc").unwrap();
        assert_eq!(sig.name(), "Codex");

        // 无命中
        assert!(catalog.match_process("bash", "bash -l").is_none());
    }

    #[test]
    fn test_match_process_first_match_wins() {
        // "claude-codex-wrapper" 同时包含两个 token，Claude 在目录中靠前
        let catalog = SignatureCatalog::builtin();
        let sig = catalog.match_process("claude-codex-wrapper", "").unwrap();
        assert_eq!(sig.name(), "Claude");
    }

    #[test]
    fn test_custom_agent_appended_after_builtins() {
        let custom = vec![CustomAgentConfig {
            name: "Goose".to_string(),
            process_tokens: vec!["goose".to_string()],
            attention_patterns: vec![r"\?\s*$".to_string()],
            working_patterns: vec![r"\.{3,}".to_string()],
        }];
        let catalog = SignatureCatalog::with_custom(&custom);

        let sig = catalog.match_process("goose", "goose session").unwrap();
        assert_eq!(sig.name(), "Goose");
        assert_eq!(sig.attention_patterns().len(), 1);
    }

    #[test]
    fn test_invalid_custom_pattern_skipped_not_fatal() {
        let custom = vec![CustomAgentConfig {
            name: "Broken".to_string(),
            process_tokens: vec!["broken".to_string()],
            attention_patterns: vec!["[unclosed".to_string(), r"\?\s*$".to_string()],
            working_patterns: vec!["(?P<".to_string()],
        }];
        let catalog = SignatureCatalog::with_custom(&custom);

        let sig = catalog.find_by_name("Broken").unwrap();
        // 无效模式被丢弃，有效模式保留
        assert_eq!(sig.attention_patterns().len(), 1);
        assert!(sig.working_patterns().is_empty());
    }

    #[test]
    fn test_custom_agent_without_tokens_skipped() {
        let custom = vec![CustomAgentConfig {
            name: "NoTokens".to_string(),
            ..Default::default()
        }];
        let catalog = SignatureCatalog::with_custom(&custom);
        assert!(catalog.find_by_name("NoTokens").is_none());
    }
}
