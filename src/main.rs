//! Tmux Agent Monitor CLI
//!
//! 监控 tmux pane 里的 AI 编码代理会话 (Claude Code, OpenCode, Codex)

use std::fs::OpenOptions;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use fs2::FileExt;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use tmux_agent_monitor::{
    Discovery, MonitorConfig, PollOrchestrator, SignatureCatalog, Spawner,
    SysinfoProbe, TmuxManager,
};

#[derive(Parser)]
#[command(name = "tam")]
#[command(about = "Tmux Agent Monitor - 监控 tmux 里的 AI 编码代理会话")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 持续监控所有会话并在状态转移时告警
    Watch {
        /// 轮询间隔（秒），覆盖配置文件
        #[arg(long, short)]
        interval: Option<u64>,
        /// 不响终端铃
        #[arg(long)]
        no_bell: bool,
    },
    /// 一次性列出发现的代理会话
    List {
        /// 输出 JSON 格式
        #[arg(long)]
        json: bool,
    },
    /// 在 tmux 里拉起一个新的代理会话并纳入监控
    Spawn {
        /// 工作目录
        #[arg(long, short, default_value = ".")]
        dir: String,
        /// 任务目标，作为代理的初始 prompt
        goal: String,
        /// 传给代理命令的额外参数
        #[arg(last = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 通过 RUST_LOG 控制日志级别，默认 info
    // 例如: RUST_LOG=debug tam watch
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tmux_agent_monitor=info,tam=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    if which::which("tmux").is_err() {
        return Err(anyhow!("tmux not found on PATH, nothing to monitor"));
    }

    let mut config = MonitorConfig::load();

    match cli.command {
        Commands::Watch { interval, no_bell } => {
            if let Some(secs) = interval {
                config.poll_interval_secs = secs;
            }
            if no_bell {
                config.ring_bell = false;
            }

            // 单实例锁：两个 watch 进程会互相干扰通知去重
            let _lock = acquire_instance_lock()?;

            let mut orchestrator = PollOrchestrator::new(
                config,
                Box::new(TmuxManager::new()),
                Box::new(SysinfoProbe::new()),
            )?;
            println!("🔍 Watching tmux panes for coding agents (Ctrl+C to stop)");
            orchestrator.run().await?;
        }
        Commands::List { json } => {
            let catalog = std::sync::Arc::new(SignatureCatalog::with_custom(&config.agents));
            let discovery = Discovery::new(catalog);
            let tmux = TmuxManager::new();
            let probe = SysinfoProbe::new();
            let snapshots = discovery.discover(&tmux, &probe);

            if json {
                let rows: Vec<serde_json::Value> = snapshots
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "pane_id": s.pane_id,
                            "pid": s.pane_pid,
                            "agent": s.signature.as_ref().map(|sig| sig.name()),
                            "agent_alive": s.agent_alive,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                let matched = snapshots.iter().filter(|s| s.signature.is_some()).count();
                println!("发现 {} 个 pane，其中 {} 个在运行编码代理:\n", snapshots.len(), matched);
                for s in &snapshots {
                    if let Some(sig) = &s.signature {
                        println!("  {}  [{}]  pid={}", s.pane_id, sig.name(), s.pane_pid);
                    }
                }
            }
        }
        Commands::Spawn { dir, goal, args } => {
            let spawner = Spawner::new(TmuxManager::new());
            let pane_id = spawner.spawn_agent(&config, &dir, &goal, &args)?;
            info!(pane_id = %pane_id, "Spawned agent session");
            println!("✅ Spawned agent in pane {}", pane_id);
            println!("   提示: `tam watch` 会自动跟踪这个 pane");
        }
    }

    Ok(())
}

/// 获取 watch 的单实例文件锁
fn acquire_instance_lock() -> Result<std::fs::File> {
    let dir = dirs::home_dir()
        .map(|home| home.join(".config/tmux-agent-monitor"))
        .ok_or_else(|| anyhow!("Cannot determine home directory"))?;
    std::fs::create_dir_all(&dir).context("Cannot create config directory")?;

    let lock_path = dir.join("tam.lock");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Cannot open lock file {}", lock_path.display()))?;

    file.try_lock_exclusive()
        .map_err(|_| anyhow!("Another `tam watch` instance is already running"))?;
    Ok(file)
}
