//! Aquifer - Georgia 饮用水数据问答助手
//!
//! 入口：初始化日志、加载配置、打开只读数据库，并在终端中逐行读取问题。
//! 命令：/new 新会话，/clear 清空当前会话，/history 查看历史，/reload 重新读取表结构，/quit 退出。

use std::path::PathBuf;

use anyhow::Context;
use aquifer::{agent::Assistant, config::load_config, observability};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let assistant = Assistant::from_config(&cfg).with_context(|| {
        format!("Failed to open database {}", cfg.database.path.display())
    })?;
    let mut session = assistant.create_session().await;

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Ask about Georgia drinking water systems (/new, /clear, /history, /reload, /quit)\n")
        .await?;
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let output = match input {
            "/quit" | "/exit" => break,
            "/new" => {
                session = assistant.create_session().await;
                format!("Started session {session}\n")
            }
            "/reload" => {
                assistant.invalidate_schema().await;
                "Schema will be reloaded on the next question.\n".to_string()
            }
            "/clear" => {
                assistant.clear_session(&session).await?;
                "Conversation cleared.\n".to_string()
            }
            "/history" => {
                let turns = assistant.get_history(&session).await?;
                turns
                    .iter()
                    .map(|t| format!("[{}] {}\n", t.role.as_str(), t.content))
                    .collect()
            }
            question => {
                let response = assistant.run_turn(&session, question).await?;
                let mut out = format!("{}\n", response.message);
                if assistant.dev_mode() {
                    if let Some(query) = &response.query {
                        out.push_str(&format!("\n-- query: {query}\n"));
                    }
                    if let Some(rows) = &response.rows {
                        out.push_str(&format!("-- rows: {}\n", rows.len()));
                    }
                }
                out
            }
        };
        stdout.write_all(output.as_bytes()).await?;
    }

    let (prompt, completion, total) = assistant.token_usage();
    tracing::info!(prompt, completion, total, "token usage");

    Ok(())
}
