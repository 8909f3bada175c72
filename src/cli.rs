//! CLI module for Puppet
//!
//! Commands:
//! - `run`: start the engine and chat on stdin (default)
//! - `say`: send one message, print the reply and exit
//! - `config`: print the resolved configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use puppet_core::{load_config, EngineComponents, EngineConfig, EngineOrchestrator};
use puppet_dialogue::{ConversationEvent, DialogueHandle};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Puppet avatar engine CLI
#[derive(Parser, Debug)]
#[command(name = "puppet")]
#[command(about = "Real-time conversational avatar engine")]
#[command(version)]
pub struct Cli {
    /// Extra configuration file layered over the defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long = "json", global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the engine and chat on stdin (default)
    Run {
        /// Print every conversation event as a JSON line
        #[arg(long)]
        events: bool,
    },
    /// Send one message and print the reply
    Say {
        /// Message text
        text: String,
    },
    /// Print the resolved configuration as JSON
    Config,
}

/// Run the CLI command
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    match cli.command.unwrap_or(Commands::Run { events: false }) {
        Commands::Run { events } => run_engine(config, events).await,
        Commands::Say { text } => say(config, &text).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn start_engine(config: EngineConfig) -> Result<EngineOrchestrator> {
    let components =
        EngineComponents::from_config(&config).context("Failed to set up renderer and adapters")?;
    let mut engine = EngineOrchestrator::new(config)?;
    engine
        .initialize(components)
        .context("Failed to initialize engine")?;
    engine.start().context("Failed to start engine")?;
    Ok(engine)
}

async fn say(config: EngineConfig, text: &str) -> Result<()> {
    let mut engine = start_engine(config)?;
    let reply = engine.dialogue()?.send_text(text).await;
    engine.stop().await?;
    println!("{}", reply?);
    Ok(())
}

async fn run_engine(config: EngineConfig, print_events: bool) -> Result<()> {
    let mut engine = start_engine(config)?;
    let dialogue = engine.dialogue()?.clone();
    let mut events = dialogue.subscribe();
    let shutdown = engine
        .shutdown_token()
        .context("Engine is not running")?;

    println!("Type a message and press Enter. Commands: /interrupt /history /clear /status /emotion <id> /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut events_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupt signal received");
                break;
            }
            () = shutdown.cancelled() => {
                warn!("Engine stopped unexpectedly");
                break;
            }
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => {
                    if !handle_line(&engine, &dialogue, line.trim()).await? {
                        break;
                    }
                }
                None => {
                    info!("Input closed; press Ctrl-C to exit");
                    stdin_open = false;
                }
            },
            event = events.recv(), if events_open => match event {
                Ok(event) if print_events => println!("{}", serde_json::to_string(&event)?),
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event output lagging"),
                Err(RecvError::Closed) => events_open = false,
            },
        }
    }

    engine.stop().await?;
    let status = engine.status()?;
    info!(
        state = %status.state,
        frames = status.frames_rendered,
        chunks = status.chunks_captured,
        dropped = status.chunks_dropped,
        "Shutdown complete"
    );
    Ok(())
}

/// Handle one line of input; returns `false` to quit
async fn handle_line(engine: &EngineOrchestrator, dialogue: &DialogueHandle, line: &str) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }

    let (command, argument) = match line.split_once(' ') {
        Some((command, argument)) => (command, argument.trim()),
        None => (line, ""),
    };

    match command {
        "/quit" | "/exit" => return Ok(false),
        "/interrupt" => {
            let state = dialogue.interrupt().await?;
            println!("(interrupted, now {})", state);
        }
        "/history" => {
            for turn in dialogue.history() {
                println!("you: {}", turn.user_input);
                println!(
                    "bot: {}{}",
                    turn.assistant_response,
                    turn.emotion_detected
                        .map(|e| format!(" [{}]", e))
                        .unwrap_or_default()
                );
            }
        }
        "/clear" => {
            dialogue.clear_history().await?;
            println!("(history cleared)");
        }
        "/status" => println!("{}", serde_json::to_string_pretty(&engine.status()?)?),
        "/emotion" if !argument.is_empty() => {
            if !engine.set_emotion(argument)? {
                println!("(unknown emotion '{}', using neutral)", argument);
            }
        }
        _ if command.starts_with('/') => println!("(unknown command {})", command),
        _ => {
            // replies arrive in the background so Ctrl-C and /interrupt stay responsive
            let dialogue = dialogue.clone();
            let text = line.to_string();
            tokio::spawn(async move {
                match dialogue.send_text(text).await {
                    Ok(reply) => println!("bot: {}", reply),
                    Err(e) => warn!(error = %e, "Message not answered"),
                }
            });
        }
    }
    Ok(true)
}

fn print_event(event: &ConversationEvent) {
    match event {
        ConversationEvent::Interrupted { during } => println!("(interrupted while {})", during),
        ConversationEvent::EmotionDetected { emotion, known: false, .. } => {
            println!("(unknown emotion '{}')", emotion)
        }
        ConversationEvent::TurnAborted { reason } => println!("(turn aborted: {})", reason),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puppet_anim::{HeadlessRenderer, ModelHandle};
    use puppet_core::load_config_from_str;
    use puppet_dialogue::{
        DialogueAdapters, ScriptedInput, ScriptedLanguageModel, ScriptedRecognizer,
        ScriptedSynthesizer, SimulatedOutput,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    fn slow_engine(llm: ScriptedLanguageModel) -> EngineOrchestrator {
        let config = load_config_from_str("").unwrap();
        let ids: Vec<String> = config
            .animation
            .parameters
            .iter()
            .map(|spec| spec.id.clone())
            .collect();
        let handle = ModelHandle::create(&config.render.model, &ids).unwrap();
        let components = EngineComponents {
            renderer: Box::new(HeadlessRenderer::new(handle)),
            input: Box::new(ScriptedInput::new()),
            adapters: DialogueAdapters {
                recognizer: Arc::new(ScriptedRecognizer::new(Vec::<&str>::new())),
                llm: Arc::new(llm),
                synthesizer: Arc::new(ScriptedSynthesizer::new()),
                output: Arc::new(SimulatedOutput::new()),
            },
        };
        let mut engine = EngineOrchestrator::new(config).unwrap();
        engine.initialize(components).unwrap();
        engine.start().unwrap();
        engine
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_message_does_not_block_input_loop() {
        let llm = ScriptedLanguageModel::new(["hi there"]).with_latency(Duration::from_secs(5));
        let mut engine = slow_engine(llm);
        let dialogue = engine.dialogue().unwrap().clone();

        let handled = timeout(
            Duration::from_millis(500),
            handle_line(&engine, &dialogue, "hello"),
        )
        .await
        .expect("input loop blocked on the reply");
        assert!(handled.unwrap());

        // the reply is still pending and the next command is served immediately
        assert!(dialogue.history().is_empty());
        let quit = timeout(
            Duration::from_millis(500),
            handle_line(&engine, &dialogue, "/quit"),
        )
        .await
        .unwrap();
        assert!(!quit.unwrap());

        engine.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_and_unknown_lines_keep_running() {
        let mut engine = slow_engine(ScriptedLanguageModel::new(Vec::<&str>::new()));
        let dialogue = engine.dialogue().unwrap().clone();
        assert!(handle_line(&engine, &dialogue, "").await.unwrap());
        assert!(handle_line(&engine, &dialogue, "/nope").await.unwrap());
        engine.stop().await.unwrap();
    }
}
