use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use confab_agents::providers::GeminiProvider;
use confab_agents::tools::{Calculator, SearchTool, WeatherTool};
use confab_agents::{ChatRole, SessionController, SessionEvent, TurnEngine};
use confab_common::Result;
use confab_db::ThreadStore;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::error;
use tracing_subscriber::EnvFilter;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when they give a better answer \
     than you can produce yourself.";

#[derive(Parser)]
#[command(name = "confab", about = "Tool-calling chat assistant with durable threads")]
struct Cli {
    /// Path to the thread database.
    #[arg(long, env = "CONFAB_DB", default_value = "confab.db")]
    db: PathBuf,

    /// Gemini model to use.
    #[arg(long, env = "GEMINI_MODEL", default_value = "gemini-2.5-pro")]
    model: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive chat. Resumes a thread when --thread is given.
    Chat {
        #[arg(long)]
        thread: Option<String>,
    },
    /// List all known threads.
    Threads,
    /// Print the full history of one thread.
    Show { thread: String },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let store = Arc::new(Mutex::new(ThreadStore::open(&cli.db)?));
    let provider = GeminiProvider::from_env()?;
    let engine = TurnEngine::new(Arc::new(provider))
        .with_model(cli.model)
        .with_system_prompt(SYSTEM_PROMPT);

    let mut controller = SessionController::new(engine, store);
    controller.register_tool(Box::new(Calculator));
    controller.register_tool(Box::new(WeatherTool::from_env()));
    controller.register_tool(Box::new(SearchTool::new()));

    match cli.command {
        Command::Chat { thread } => chat(&controller, thread).await,
        Command::Threads => {
            for summary in controller.list_threads().await? {
                let name = summary.name.as_deref().unwrap_or("(unnamed)");
                println!("{}  {}", summary.id, name);
            }
            Ok(())
        }
        Command::Show { thread } => {
            for message in controller.load(&thread).await? {
                print_message(message.role, &message.content, message.tool_name.as_deref());
            }
            Ok(())
        }
    }
}

async fn chat(controller: &SessionController, thread: Option<String>) -> Result<()> {
    let thread_id = match thread {
        Some(id) => id,
        None => controller.new_thread(),
    };
    println!("thread: {thread_id}");

    for message in controller.load(&thread_id).await? {
        print_message(message.role, &message.content, message.tool_name.as_deref());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<SessionEvent>(32);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SessionEvent::TextDelta(text) => {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    SessionEvent::ToolStarted { name } => {
                        println!("[using {name}]");
                    }
                }
            }
        });

        match controller.send(&thread_id, line, Some(tx)).await {
            Ok(_) => {}
            Err(e) => eprintln!("turn failed: {e}"),
        }
        let _ = printer.await;
        println!();
    }
}

fn print_message(role: ChatRole, content: &str, tool_name: Option<&str>) {
    match role {
        ChatRole::User => println!("you: {content}"),
        ChatRole::Assistant => {
            if !content.is_empty() {
                println!("assistant: {content}");
            }
        }
        ChatRole::Tool => {
            println!("[{}] {content}", tool_name.unwrap_or("tool"));
        }
    }
}
