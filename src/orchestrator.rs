//! 轮询编排器 - 每个 tick 串行跑完发现/合并/分类/通知/总结
//!
//! 单逻辑线程：定时器驱动一次完整轮询，跑完才开始下一个 tick，
//! tick 之间绝不重叠，所以会话和缓存状态不需要加锁。外部调用
//! 都是带超时的阻塞调用，单个超时只影响该调用，不影响整个 tick。
//!
//! 总结的外部调用最慢，放在 tick 关键路径之外：每个 pane 最多一个
//! 在途请求（在途期间的新请求被抑制而不是排队），结果通过 channel
//! 送回，由之后的 tick 读取，绝不在发起请求的 tick 里同步等待。

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::discovery::Discovery;
use crate::infra::{PaneBackend, ProcessProbe};
use crate::links::LinkRegistry;
use crate::notification::NotificationEngine;
use crate::registry::SessionRegistry;
use crate::signature::SignatureCatalog;
use crate::status::{classify, content_changed};
use crate::summarize::{build_prompt, Summarizer, SummaryProvider};

/// 后台总结任务的结果
struct SummaryOutcome {
    pane_id: String,
    result: Result<String>,
}

/// 轮询编排器
pub struct PollOrchestrator {
    config: MonitorConfig,
    panes: Box<dyn PaneBackend>,
    probe: Box<dyn ProcessProbe>,
    discovery: Discovery,
    registry: SessionRegistry,
    engine: NotificationEngine,
    links: LinkRegistry,
    summarizer: Summarizer,
    /// 有总结请求在途的 pane 集合
    in_flight: HashSet<String>,
    tx: Sender<SummaryOutcome>,
    rx: Receiver<SummaryOutcome>,
}

impl PollOrchestrator {
    /// 用配置指定的总结后端构建编排器
    pub fn new(
        config: MonitorConfig,
        panes: Box<dyn PaneBackend>,
        probe: Box<dyn ProcessProbe>,
    ) -> Result<Self> {
        let provider = crate::summarize::build_provider(&config.summary)?;
        Ok(Self::with_provider(config, panes, probe, provider))
    }

    /// 用给定的总结后端构建编排器（测试时注入假后端）
    pub fn with_provider(
        config: MonitorConfig,
        panes: Box<dyn PaneBackend>,
        probe: Box<dyn ProcessProbe>,
        provider: Arc<dyn SummaryProvider>,
    ) -> Self {
        let catalog = Arc::new(SignatureCatalog::with_custom(&config.agents));
        let links = LinkRegistry::with_custom(&config.links);
        let summarizer = Summarizer::new(
            provider,
            Duration::from_secs(config.summary.interval_secs),
            config.summary.max_tokens,
        );
        let (tx, rx) = mpsc::channel();

        Self {
            config,
            panes,
            probe,
            discovery: Discovery::new(catalog),
            registry: SessionRegistry::new(),
            engine: NotificationEngine::new(),
            links,
            summarizer,
            in_flight: HashSet::new(),
            tx,
            rx,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn badge_count(&self) -> usize {
        self.engine.badge_count()
    }

    /// 清除一个会话的 attention 标记（用户操作，tick 之间调用）
    pub fn clear_attention(&mut self, pane_id: &str) {
        self.engine.clear_attention(pane_id);
    }

    /// 强制淘汰一个会话的总结缓存，下个 tick 重新总结
    pub fn invalidate_summary(&mut self, pane_id: &str) {
        self.summarizer.invalidate(pane_id);
    }

    /// 强制刷新所有会话的总结
    pub fn refresh_all_summaries(&mut self) {
        for pane_id in self.registry.pane_ids() {
            self.summarizer.invalidate(&pane_id);
        }
    }

    /// 登记一个刚 spawn 的 pane，使其在启动窗口期不被忽略
    pub fn track_spawned(&mut self, pane_id: &str) {
        self.registry.track_spawned(pane_id);
    }

    /// 跑一个完整的 tick，返回本 tick 新告警的 pane 标识
    pub fn tick(&mut self) -> Vec<String> {
        let now = Instant::now();

        // 1. 发现并合并
        self.probe.refresh();
        let discovered = self.discovery.discover(self.panes.as_ref(), self.probe.as_ref());
        self.registry.reconcile(&discovered);

        // spawn 保护但本 tick 没被发现的 pane：直接探测进程存活
        let discovered_ids: HashSet<&str> = discovered.iter().map(|s| s.pane_id.as_str()).collect();
        let undiscovered: Vec<(String, u32)> = self
            .registry
            .sessions()
            .values()
            .filter(|s| !discovered_ids.contains(s.pane_id.as_str()))
            .map(|s| (s.pane_id.clone(), s.pane_pid))
            .collect();
        for (pane_id, pid) in undiscovered {
            let alive = self.probe.is_alive(pid);
            if let Some(session) = self.registry.get_mut(&pane_id) {
                session.agent_alive = alive;
            }
        }

        // 2. 逐会话更新：捕获、指纹、链接、退出码、分类
        for pane_id in self.registry.pane_ids() {
            let content = self.panes.capture_pane(&pane_id, self.config.capture_lines);

            let probed = self.registry.get(&pane_id).map(|s| (s.agent_alive, s.pane_pid));
            let Some((alive, pid)) = probed else { continue };
            let exit_code = if alive { None } else { self.probe.exit_code(pid) };

            let Some(session) = self.registry.get_mut(&pane_id) else { continue };

            let (changed, fingerprint) = content_changed(session.last_content_hash, &content);
            if changed {
                session.last_output_time = now;
                session.last_content_hash = fingerprint;
                session.links = self.links.scan(&content);
            }
            if exit_code.is_some() {
                session.exit_code = exit_code;
            }

            session.status = classify(
                &content,
                session.agent_alive,
                session.exit_code,
                session.last_output_time,
                now,
                session.signature.as_deref(),
            );
        }

        // 3. 通知检查
        let newly_alerting = self.engine.check_transitions(self.registry.sessions_mut());
        if !newly_alerting.is_empty() {
            info!(
                count = newly_alerting.len(),
                badge = self.engine.badge_count(),
                "Sessions newly alerting"
            );
            if self.config.ring_bell {
                ring_bell();
            }
        }

        // 4. 总结：先收上一个 tick 的结果，再派发新请求
        self.drain_summary_results();
        for pane_id in self.registry.pane_ids() {
            if self.summarizer.should_refresh(&pane_id) && !self.in_flight.contains(&pane_id) {
                let content = self
                    .panes
                    .capture_pane(&pane_id, self.config.summary_capture_lines);
                self.dispatch_summary(pane_id.clone(), content);
            }

            // 缓存里已有的总结回填到会话上
            let cached = self
                .summarizer
                .get_cached(&pane_id)
                .map(|s| (s.goal.clone(), s.progress.clone()));
            if let Some((goal, progress)) = cached {
                if let Some(session) = self.registry.get_mut(&pane_id) {
                    session.goal.get_or_insert(goal);
                    session.progress.get_or_insert(progress);
                }
            }
        }

        newly_alerting
    }

    /// 把总结请求派发到后台线程，结果由之后的 tick 读取
    fn dispatch_summary(&mut self, pane_id: String, content: String) {
        let provider = self.summarizer.provider();
        let max_tokens = self.summarizer.max_tokens();
        let tx = self.tx.clone();

        debug!(pane_id = %pane_id, "Dispatching background summary");
        self.in_flight.insert(pane_id.clone());
        thread::spawn(move || {
            let prompt = build_prompt(&content);
            let result = provider.complete(&prompt, max_tokens);
            // 接收端关闭说明编排器已经没了，结果直接丢弃
            let _ = tx.send(SummaryOutcome { pane_id, result });
        });
    }

    /// 收取已完成的后台总结结果
    fn drain_summary_results(&mut self) {
        while let Ok(outcome) = self.rx.try_recv() {
            self.in_flight.remove(&outcome.pane_id);
            match outcome.result {
                Ok(text) => {
                    self.summarizer.store_response(&outcome.pane_id, &text);
                    let latest = self
                        .summarizer
                        .get_cached(&outcome.pane_id)
                        .map(|s| (s.goal.clone(), s.progress.clone()));
                    if let Some((goal, progress)) = latest {
                        if let Some(session) = self.registry.get_mut(&outcome.pane_id) {
                            session.goal = Some(goal);
                            session.progress = Some(progress);
                        }
                    }
                }
                Err(e) => {
                    warn!(pane_id = %outcome.pane_id, error = %e,
                        "Background summarization failed, keeping previous summary");
                }
            }
        }
    }

    /// 以配置的间隔持续轮询
    pub async fn run(&mut self) -> Result<()> {
        let period = Duration::from_secs(self.config.poll_interval_secs.max(1));
        info!(interval_secs = period.as_secs(), "Starting poll loop");

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let alerting = self.tick();
            for pane_id in &alerting {
                if let Some(session) = self.registry.get(pane_id) {
                    println!(
                        "🔔 {} {} — {}",
                        session.status.icon(),
                        session.display_name(),
                        session.status.label()
                    );
                }
            }
        }
    }
}

/// 终端响铃
fn ring_bell() {
    use std::io::Write;
    print!("\x07");
    let _ = std::io::stdout().flush();
}
