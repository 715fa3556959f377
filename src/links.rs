//! 链接插件 - 从终端输出中识别 URL 和工单引用
//!
//! 内置插件覆盖 GitHub PR/Issue、Linear 工单和本地开发服务器，
//! 用户可以通过配置追加自定义插件（正则 + 标签模板）。

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::warn;

/// 在终端输出中识别到的一个链接
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedLink {
    /// 来源插件名
    pub plugin: String,
    pub icon: String,
    pub url: String,
    pub label: String,
}

/// 标签生成方式
#[derive(Debug, Clone)]
enum Labeler {
    /// 直接使用完整 URL
    Url,
    /// 模板展开，支持 $0/$1 捕获组引用（如 "PR #$1"）
    Template(String),
}

/// 单个链接检测插件
#[derive(Debug, Clone)]
pub struct LinkPlugin {
    name: String,
    icon: String,
    pattern: Regex,
    labeler: Labeler,
}

impl LinkPlugin {
    fn new(name: &str, icon: &str, pattern: Regex, labeler: Labeler) -> Self {
        Self {
            name: name.to_string(),
            icon: icon.to_string(),
            pattern,
            labeler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn label_for(&self, caps: &Captures) -> String {
        match &self.labeler {
            Labeler::Url => caps[0].to_string(),
            Labeler::Template(tpl) => {
                let mut label = String::new();
                caps.expand(tpl, &mut label);
                label
            }
        }
    }

    /// 在文本中查找全部命中，插件内部按 URL 去重
    pub fn find_links(&self, text: &str) -> Vec<DetectedLink> {
        let mut results = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for caps in self.pattern.captures_iter(text) {
            let url = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            if url.is_empty() || seen.contains(&url) {
                continue;
            }
            seen.push(url);
            results.push(DetectedLink {
                plugin: self.name.clone(),
                icon: self.icon.clone(),
                url: url.to_string(),
                label: self.label_for(&caps),
            });
        }
        results
    }
}

/// 用户自定义链接插件的配置条目
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CustomLinkConfig {
    pub name: String,
    pub icon: String,
    pub pattern: String,
    pub label: String,
}

fn builtin_plugins() -> Vec<LinkPlugin> {
    [
        (
            "github-pr",
            "🔗",
            r"https://github\.com/[^\s]+/pull/(\d+)",
            Labeler::Template("PR #$1".to_string()),
        ),
        (
            "github-issue",
            "🔗",
            r"https://github\.com/[^\s]+/issues/(\d+)",
            Labeler::Template("Issue #$1".to_string()),
        ),
        // 兜底：任何 github URL。PR/Issue 插件在前，同一 URL 不会重复
        (
            "github-repo",
            "🔗",
            r"https://github\.com/[^\s]+",
            Labeler::Url,
        ),
        (
            "linear",
            "🎫",
            r"\b([A-Z][A-Z0-9]+-\d+)\b",
            Labeler::Template("$1".to_string()),
        ),
        (
            "localhost",
            "🌐",
            r"https?://(localhost:\d+)[^\s]*",
            Labeler::Template("$1".to_string()),
        ),
    ]
    .into_iter()
    .filter_map(|(name, icon, pattern, labeler)| {
        Regex::new(pattern)
            .ok()
            .map(|re| LinkPlugin::new(name, icon, re, labeler))
    })
    .collect()
}

/// 链接插件注册表 - 内置插件在前，自定义插件在后
pub struct LinkRegistry {
    plugins: Vec<LinkPlugin>,
}

impl LinkRegistry {
    pub fn builtin() -> Self {
        Self {
            plugins: builtin_plugins(),
        }
    }

    /// 内置插件加自定义插件，无效的正则条目会被跳过
    pub fn with_custom(custom: &[CustomLinkConfig]) -> Self {
        let mut registry = Self::builtin();
        for cfg in custom {
            if cfg.pattern.is_empty() {
                continue;
            }
            match Regex::new(&cfg.pattern) {
                Ok(re) => {
                    let name = if cfg.name.is_empty() { "custom" } else { cfg.name.as_str() };
                    let icon = if cfg.icon.is_empty() { "🔗" } else { cfg.icon.as_str() };
                    let labeler = if cfg.label.is_empty() {
                        Labeler::Url
                    } else {
                        Labeler::Template(cfg.label.clone())
                    };
                    registry.plugins.push(LinkPlugin::new(name, icon, re, labeler));
                }
                Err(e) => {
                    warn!(name = %cfg.name, pattern = %cfg.pattern, error = %e, "Skipping invalid link pattern");
                }
            }
        }
        registry
    }

    /// 扫描文本，聚合所有插件的命中，跨插件按 URL 去重，保持顺序
    pub fn scan(&self, text: &str) -> Vec<DetectedLink> {
        let mut results: Vec<DetectedLink> = Vec::new();
        for plugin in &self.plugins {
            for link in plugin.find_links(text) {
                if !results.iter().any(|l| l.url == link.url) {
                    results.push(link);
                }
            }
        }
        results
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
