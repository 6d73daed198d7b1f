use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use shelf_app::modules::library::turn_handler;
use shelf_app::{ConversationState, Intent, TurnHandler, TurnRequest};
use shelf_kernel::settings::Settings;

mod utterance;

#[derive(Parser)]
#[command(name = "shelf", version, about = "Personal library from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve,
    /// Run a single turn and print the response as JSON
    Turn {
        /// Library owner
        #[arg(long)]
        user: String,
        /// Session returned by the previous turn, as JSON
        #[arg(long)]
        session: Option<String>,
        /// Command followed by key=value slots, e.g. `add_book title=Dune`
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        words: Vec<String>,
    },
    /// Talk to your library interactively
    Chat {
        #[arg(long, default_value = "console")]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("failed to load shelf settings")?;

    match cli.command {
        Command::Serve => {
            shelf_telemetry::init(&settings.telemetry);
            tracing::info!(env = ?settings.environment, "shelf CLI serving");
            shelf_app::run_server(settings).await
        }
        Command::Turn {
            user,
            session,
            words,
        } => {
            let session = match session {
                Some(raw) => serde_json::from_str(&raw).context("--session is not valid JSON")?,
                None => ConversationState::default(),
            };
            let input = utterance::parse(&words.join(" "))?;
            let response = turn_handler(&settings)
                .handle(TurnRequest {
                    user_id: user,
                    input,
                    session,
                })
                .await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Chat { user } => chat(&turn_handler(&settings), user).await,
    }
}

async fn chat(handler: &TurnHandler, user_id: String) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut session = ConversationState::default();
    let mut input = Intent::StartSession;

    loop {
        let response = handler
            .handle(TurnRequest {
                user_id: user_id.clone(),
                input,
                session,
            })
            .await;
        if !response.speech.is_empty() {
            println!("{}", response.speech);
        }
        if response.end_session {
            return Ok(());
        }
        session = response.session;

        input = loop {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            let Some(line) = lines.next_line().await? else {
                return Ok(());
            };
            match utterance::parse(&line) {
                Ok(intent) => break intent,
                Err(err) => eprintln!("{err:#}"),
            }
        };
    }
}
