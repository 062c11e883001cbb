//! Scribe - 笔记对话助手
//!
//! 入口：初始化日志、加载配置、打开聊天会话，在标准输入上运行行式 REPL（使用 Mock LLM）。
//! `--agent` 强制开启 Agent 模式；Ctrl+C 停止当前轮。

use std::sync::Arc;

use anyhow::Context;
use scribe::config::load_config;
use scribe::llm::MockLlmClient;
use scribe::memory::ChatHistoryStore;
use scribe::react::AgentEvent;
use scribe::{observability, ChatComponents, ChatSession};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "Commands: /regen N, /continue [text], /export N, /history, /clear, /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let mut cfg = load_config(None).context("Failed to load config")?;
    if std::env::args().any(|a| a == "--agent") {
        cfg.agent.enabled = true;
    }
    let workspace = cfg.app.workspace_root();
    tokio::fs::create_dir_all(&workspace)
        .await
        .with_context(|| format!("Failed to create vault {}", workspace.display()))?;

    let components = ChatComponents::from_config(&cfg, Arc::new(MockLlmClient));
    let store = ChatHistoryStore::new(cfg.app.history_path());
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let session = ChatSession::open(store, components)
        .await
        .with_events(event_tx);

    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            match ev {
                AgentEvent::ToolCall { action, parameters } => {
                    eprintln!("  -> {} {}", action, parameters)
                }
                AgentEvent::ToolResult {
                    action,
                    success,
                    preview,
                } => eprintln!("  <- {} [{}] {}", action, if success { "ok" } else { "error" }, preview),
                _ => {}
            }
        }
    });

    let supervisor = session.supervisor();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            supervisor.cancel();
        }
    });

    println!(
        "{} ({} turns loaded, agent mode {}). {}",
        cfg.app.name.as_deref().unwrap_or("scribe"),
        session.turns().len(),
        if cfg.agent.enabled { "on" } else { "off" },
        HELP
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&session, line).await {
            eprintln!("error: {}", e);
        }
    }
    Ok(())
}

async fn handle_line(session: &ChatSession, line: &str) -> anyhow::Result<()> {
    let (command, arg) = match line.split_once(' ') {
        Some((c, a)) => (c, a.trim()),
        None => (line, ""),
    };
    match command {
        "/history" => {
            for (i, turn) in session.turns().iter().enumerate() {
                println!("[{}] {} {}: {}", i, turn.timestamp, turn.sender.as_str(), turn.content);
            }
        }
        "/clear" => {
            session.clear().await?;
            println!("History cleared.");
        }
        "/regen" => {
            let index: usize = arg.parse().context("Usage: /regen N")?;
            let outcome = session.regenerate(index).await?;
            print_outcome(&outcome);
        }
        "/continue" => {
            let follow_up = (!arg.is_empty()).then_some(arg);
            let outcome = session.continue_turn(follow_up).await?;
            print_outcome(&outcome);
        }
        "/export" => {
            let index: usize = arg.parse().context("Usage: /export N")?;
            println!("{}", session.export(index)?);
        }
        c if c.starts_with('/') => println!("{}", HELP),
        _ => {
            let outcome = session.send(line).await?;
            print_outcome(&outcome);
        }
    }
    Ok(())
}

fn print_outcome(outcome: &scribe::react::TurnOutcome) {
    if !outcome.content.is_empty() {
        println!("{}", outcome.content);
    }
    println!(
        "({}, {}/{} tool calls)",
        outcome.status().as_str(),
        outcome.task_status.tool_execution_count,
        outcome.task_status.max_tool_executions
    );
}
