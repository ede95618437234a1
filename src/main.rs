//! `agentbridge`: serve prompts from stdin against the configured tool servers.
//!
//! Each input line is one prompt in the current session. Lines starting with
//! `/` are REPL commands: `/tools`, `/sessions`, `/history`, `/new`, `/quit`.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use agentbridge::commands::{chat, session, ErrorKind};
use agentbridge::config::{find_config_path, load_config};
use agentbridge::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    agentbridge::init_tracing();

    let cwd = std::env::current_dir().context("cannot read current directory")?;
    let path = find_config_path(&cwd)?;
    let config = load_config(&path)?;
    let state = agentbridge::bootstrap(&config)
        .await
        .context("failed to initialize the model client")?;

    println!(
        "agentbridge ready: {} tools. Type a prompt, or /quit to exit.",
        chat::list_tools(&state).len()
    );

    let result = repl(&state).await;
    state.shutdown().await;
    result
}

async fn repl(state: &AppState) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_id: Option<String> = None;

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session_id = None;
                println!("started a new session");
            }
            "/tools" => {
                for tool in chat::list_tools(state) {
                    println!("{:<40} {}", tool.name, tool.description);
                }
            }
            "/sessions" => {
                for summary in session::list_sessions(state) {
                    println!(
                        "{}  messages={} steps={} url={}",
                        summary.id,
                        summary.message_count,
                        summary.step_count,
                        summary.current_url.as_deref().unwrap_or("-")
                    );
                }
            }
            "/history" => match session_id.as_deref() {
                Some(id) => match session::get_history(state, id) {
                    Ok(history) => println!("{}", serde_json::to_string_pretty(&history)?),
                    Err(e) => {
                        eprintln!("error: {e}");
                        if e.kind == ErrorKind::NotFound {
                            session_id = None;
                        }
                    }
                },
                None => println!("no active session"),
            },
            prompt => {
                let request = chat::PromptRequest {
                    session_id: session_id.clone(),
                    continue_session: session_id.is_some(),
                    text: prompt.to_string(),
                };
                match chat::process_prompt(state, request).await {
                    Ok(outcome) => {
                        println!("{}", outcome.response_text);
                        for record in &outcome.locators {
                            println!(
                                "  [{}] {} {}",
                                if record.success { "ok" } else { "failed" },
                                record.action,
                                record.locator.as_deref().unwrap_or("-")
                            );
                        }
                        println!("  ({} steps total)", outcome.total_steps);
                        session_id = Some(outcome.session_id);
                    }
                    Err(e) => {
                        eprintln!("error: {e}");
                        // The session expired or was removed; start fresh next time.
                        if e.kind == ErrorKind::NotFound {
                            session_id = None;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
