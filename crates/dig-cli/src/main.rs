use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use dig_contracts::attachments::RawFile;
use dig_contracts::commands::{help_lines, parse_command, StudioCommand};
use dig_contracts::presets::{format_resolution, AspectRatio, PresetRegistry};
use dig_contracts::share::save_image;
use dig_contracts::store::{LibraryUpdate, LikeState, LocalStore, NewLibraryEntry};
use dig_engine::{
    build_chat, build_studio, ChatReply, ChatSession, EngineConfig, Studio, StudioAction,
    TransportKind,
};
use serde_json::{json, Value};

/// Matches the history page size of the store contract.
const HISTORY_CAP: usize = 50;

#[derive(Debug, Parser)]
#[command(name = "dig", version, about = "Prompt-to-image studio")]
struct Cli {
    /// http, gemini or dryrun. Defaults to whatever the environment configures.
    #[arg(long, global = true)]
    transport: Option<TransportKind>,
    /// Data directory (overrides DIG_HOME).
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    /// User id for saved records (overrides DIG_USER).
    #[arg(long, global = true)]
    user: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compose one prompt, generate once and save the images.
    Generate(GenerateArgs),
    /// Interactive session with slash commands.
    Studio,
    /// List the built-in style presets.
    Presets,
    /// Past generations, newest first.
    History(HistoryArgs),
    /// Recently submitted prompts.
    Recent(RecentArgs),
    /// Talk a rough idea into a detailed prompt, then generate from it.
    Chat(ChatArgs),
    #[command(subcommand)]
    Library(LibraryCommand),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(required = true, num_args = 1..)]
    prompt: Vec<String>,
    #[arg(long)]
    preset: Option<String>,
    /// Free-text style snippet; selects the custom preset.
    #[arg(long)]
    custom: Option<String>,
    #[arg(long)]
    ratio: Option<AspectRatio>,
    #[arg(long = "attach")]
    attachments: Vec<PathBuf>,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    #[arg(long, default_value_t = HISTORY_CAP)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct RecentArgs {
    #[arg(long)]
    clear: bool,
}

#[derive(Debug, Args)]
struct ChatArgs {
    /// Continue a saved conversation.
    #[arg(long)]
    session: Option<String>,
    /// List saved conversations and exit.
    #[arg(long)]
    list: bool,
}

#[derive(Debug, Subcommand)]
enum LibraryCommand {
    /// Public entries, or only yours with --mine.
    List {
        #[arg(long)]
        mine: bool,
        /// Keep entries whose title, prompt or category contains this text.
        #[arg(long)]
        query: Option<String>,
    },
    Add {
        prompt: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        private: bool,
        /// Generation record the entry was saved from.
        #[arg(long)]
        source: Option<String>,
    },
    Show {
        id: String,
    },
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        public: Option<bool>,
    },
    Delete {
        id: String,
    },
    Like {
        id: String,
    },
    /// Ids of the entries you liked.
    Likes,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("dig error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(home) = cli.home {
        config.home = home;
    }
    if let Some(user) = cli.user.filter(|value| !value.trim().is_empty()) {
        config.user_id = user.trim().to_string();
    }
    let transport = config.resolve_transport(cli.transport);

    match cli.command {
        Command::Generate(args) => run_generate(&config, transport, args),
        Command::Studio => run_studio(&config, transport),
        Command::Presets => {
            print_presets(&PresetRegistry::default());
            Ok(0)
        }
        Command::History(args) => run_history(&config, args),
        Command::Recent(args) => {
            let recents = config.recents();
            if args.clear {
                recents.clear();
                println!("Recent prompts cleared.");
            } else {
                for prompt in recents.read() {
                    println!("{prompt}");
                }
            }
            Ok(0)
        }
        Command::Library(command) => run_library(&config.store(), &config.user_id, command),
        Command::Chat(args) => run_chat(&config, cli.transport, args),
    }
}

fn run_generate(config: &EngineConfig, transport: TransportKind, args: GenerateArgs) -> Result<i32> {
    let mut studio = build_studio(config, transport)?;
    if let Some(preset) = args.preset {
        studio.dispatch(StudioAction::SelectPreset(preset))?;
    }
    if let Some(custom) = args.custom {
        studio.dispatch(StudioAction::ApplyCustom(custom))?;
    }
    if let Some(ratio) = args.ratio {
        studio.dispatch(StudioAction::SetAspectRatio(ratio))?;
    }
    let files = args
        .attachments
        .iter()
        .map(RawFile::from_path)
        .collect::<Result<Vec<_>>>()?;
    if !files.is_empty() {
        studio.dispatch(StudioAction::AddFiles(files))?;
    }
    studio.dispatch(StudioAction::EditText(args.prompt.join(" ")))?;
    studio.dispatch(StudioAction::Submit)?;

    let saved = save_results(&studio, &args.out)?;
    if args.json {
        let result = studio.result().cloned().unwrap_or_default();
        let payload = json!({
            "saved_prompt": studio.saved_prompt(),
            "texts": result.texts,
            "images": saved
                .iter()
                .map(|(path, alt_text)| json!({"path": path.display().to_string(), "alt_text": alt_text}))
                .collect::<Vec<Value>>(),
            "record_id": studio.last_record().map(|record| record.record_id.clone()),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_result(&studio, &saved);
    }
    Ok(0)
}

fn save_results(studio: &Studio, out: &Path) -> Result<Vec<(PathBuf, String)>> {
    studio
        .artifacts(&Local::now())
        .into_iter()
        .map(|artifact| {
            let path = save_image(&artifact.resource, out, &artifact.filename)?;
            Ok((path, artifact.alt_text))
        })
        .collect()
}

fn print_result(studio: &Studio, saved: &[(PathBuf, String)]) {
    let Some(result) = studio.result() else {
        return;
    };
    if let Some(prompt) = studio.saved_prompt() {
        println!("Prompt: {prompt}");
    }
    if !result.texts.is_empty() {
        println!("{}", result.texts);
    }
    if result.is_empty() {
        println!("(no output)");
    }
    for (path, alt_text) in saved {
        println!("Saved {} ({alt_text})", path.display());
    }
}

fn print_presets(registry: &PresetRegistry) {
    for preset in registry.list() {
        println!(
            "{:<13} {:<20} {:>5}  {}",
            preset.id,
            preset.label,
            preset.ratio.as_str(),
            format_resolution(preset)
        );
        if let Some(desc) = preset.desc.as_deref() {
            println!("{:<13} {desc}", "");
        }
    }
}

fn print_status(studio: &Studio) {
    println!(
        "transport={} status={} preset={} ratio={}",
        studio.transport(),
        studio.status().as_str(),
        studio.active_preset().unwrap_or("none"),
        studio.aspect_ratio()
    );
    if !studio.custom_snippet().is_empty() {
        println!("custom: {}", studio.custom_snippet());
    }
    for (idx, attachment) in studio.attachments().iter().enumerate() {
        println!(
            "  #{} {} ({}, {} bytes) {}",
            idx + 1,
            attachment.name(),
            attachment.media_type(),
            attachment.size(),
            attachment.preview().url()
        );
    }
    if let Some(err) = studio.last_error() {
        println!("last error: {err}");
    }
}

fn run_studio(config: &EngineConfig, transport: TransportKind) -> Result<i32> {
    let mut studio = build_studio(config, transport)?;
    let store = config.store();
    let recents = config.recents();
    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "dig studio ({}). Type a prompt to generate, /help for commands.",
        studio.transport()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let command = parse_command(line.trim_end_matches(['\n', '\r']));
        let outcome: Result<()> = match command {
            StudioCommand::Noop => Ok(()),
            StudioCommand::Quit => break,
            StudioCommand::Help => {
                for usage in help_lines() {
                    println!("  {usage}");
                }
                println!("  anything else is sent as a prompt");
                Ok(())
            }
            StudioCommand::Generate { text } => {
                println!("Generating...");
                studio
                    .dispatch(StudioAction::EditText(text))
                    .and_then(|_| studio.dispatch(StudioAction::Submit))
                    .map(|_| print_result(&studio, &[]))
                    .map_err(Into::into)
            }
            StudioCommand::SelectPreset { preset } => studio
                .dispatch(StudioAction::SelectPreset(preset))
                .map(|_| print_status(&studio))
                .map_err(Into::into),
            StudioCommand::ApplyCustom { snippet } => studio
                .dispatch(StudioAction::ApplyCustom(snippet))
                .map(|_| print_status(&studio))
                .map_err(Into::into),
            StudioCommand::SetAspectRatio { ratio } => ratio
                .parse::<AspectRatio>()
                .map_err(anyhow::Error::msg)
                .and_then(|ratio| Ok(studio.dispatch(StudioAction::SetAspectRatio(ratio))?))
                .map(|_| print_status(&studio)),
            StudioCommand::Attach { paths } => attach_paths(&mut studio, &paths),
            StudioCommand::RemoveAttachment { index: Some(index) } => studio
                .dispatch(StudioAction::RemoveAttachment(index))
                .map(|_| print_status(&studio))
                .map_err(Into::into),
            StudioCommand::RemoveAttachment { index: None } => {
                Err(anyhow::anyhow!("usage: /remove <n> (1-based)"))
            }
            StudioCommand::ClearAttachments => studio
                .dispatch(StudioAction::ClearAttachments)
                .map_err(Into::into),
            StudioCommand::ClearResults => studio
                .dispatch(StudioAction::ClearResults)
                .map_err(Into::into),
            StudioCommand::SaveImages { dir } => {
                let dir = PathBuf::from(dir.unwrap_or_else(|| ".".to_string()));
                save_results(&studio, &dir).map(|saved| {
                    if saved.is_empty() {
                        println!("Nothing to save.");
                    }
                    for (path, _) in saved {
                        println!("Saved {}", path.display());
                    }
                })
            }
            StudioCommand::Status => {
                print_status(&studio);
                Ok(())
            }
            StudioCommand::ListPresets => {
                print_presets(studio.presets());
                Ok(())
            }
            StudioCommand::History => {
                print_history(&store, &config.user_id, 10);
                Ok(())
            }
            StudioCommand::Recent => {
                for prompt in recents.read() {
                    println!("  {prompt}");
                }
                Ok(())
            }
            StudioCommand::Unknown { command, .. } => {
                Err(anyhow::anyhow!("unknown command /{command}; try /help"))
            }
        };
        if let Err(err) = outcome {
            eprintln!("dig error: {err:#}");
        }
    }
    Ok(0)
}

const CHAT_HELP: [&str; 4] = [
    "/new               start a fresh conversation",
    "/generate [dir]    generate from the final prompt and save the images",
    "/quit              leave",
    "anything else is sent to the assistant",
];

fn run_chat(config: &EngineConfig, explicit: Option<TransportKind>, args: ChatArgs) -> Result<i32> {
    if args.list {
        let sessions = config.store().chat_sessions(&config.user_id);
        if sessions.is_empty() {
            println!("No saved conversations.");
        }
        for session in sessions {
            println!(
                "{}  {}  ({} messages)  {}",
                session.updated_at,
                session.session_id,
                session.messages,
                session.opening.replace('\n', " ")
            );
        }
        return Ok(0);
    }

    let mut chat = build_chat(config, config.resolve_chat_transport(explicit)?)?;
    if let Some(session_id) = args.session.as_deref() {
        chat.resume(session_id)?;
        for turn in chat.transcript() {
            println!("{}: {}", turn.role, turn.content);
        }
    }
    println!(
        "dig chat ({}, session {}). Describe the image you have in mind, /help for commands.",
        chat.transport(),
        chat.session_id()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        print!("you> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim();
        let outcome: Result<()> = match input.split_once(char::is_whitespace).unwrap_or((input, "")) {
            ("", _) => Ok(()),
            ("/quit" | "/exit", _) => break,
            ("/help", _) => {
                for usage in CHAT_HELP {
                    println!("  {usage}");
                }
                Ok(())
            }
            ("/new", _) => {
                chat.start_over();
                println!("New conversation {}.", chat.session_id());
                Ok(())
            }
            ("/generate", dir) => generate_from_chat(config, explicit, &chat, dir.trim()),
            (command, _) if command.starts_with('/') => {
                Err(anyhow::anyhow!("unknown command {command}; try /help"))
            }
            _ => chat.send(input).map_err(Into::into).map(|reply| match reply {
                ChatReply::Message(text) => println!("dig> {text}"),
                ChatReply::FinalPrompt(prompt) => {
                    println!("dig> Final prompt: {prompt}");
                    println!("     /generate to render it, or keep refining.");
                }
            }),
        };
        if let Err(err) = outcome {
            eprintln!("dig error: {err:#}");
        }
    }
    Ok(0)
}

fn generate_from_chat(
    config: &EngineConfig,
    explicit: Option<TransportKind>,
    chat: &ChatSession,
    dir: &str,
) -> Result<()> {
    let Some(prompt) = chat.final_prompt() else {
        bail!("no final prompt yet; keep answering the assistant's questions");
    };
    let mut studio = build_studio(config, config.resolve_transport(explicit))?;
    println!("Generating...");
    studio.dispatch(StudioAction::EditText(prompt.to_string()))?;
    studio.dispatch(StudioAction::Submit)?;
    let dir = if dir.is_empty() { "." } else { dir };
    let saved = save_results(&studio, Path::new(dir))?;
    print_result(&studio, &saved);
    Ok(())
}

fn attach_paths(studio: &mut Studio, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        bail!("usage: /attach <path> [path ...]");
    }
    let files = paths
        .iter()
        .map(RawFile::from_path)
        .collect::<Result<Vec<_>>>()?;
    studio.dispatch(StudioAction::AddFiles(files))?;
    print_status(studio);
    Ok(())
}

fn print_history(store: &LocalStore, user_id: &str, limit: usize) {
    let entries = store.list_history(user_id, limit);
    if entries.is_empty() {
        println!("No generations yet.");
    }
    for entry in entries {
        println!("{}  {}", entry.record.created_at, entry.record.id);
        println!("  {}", entry.record.prompt_text.replace('\n', " "));
        for url in &entry.images.inputs {
            println!("  in:  {url}");
        }
        for url in &entry.images.outputs {
            println!("  out: {url}");
        }
    }
}

fn run_history(config: &EngineConfig, args: HistoryArgs) -> Result<i32> {
    let store = config.store();
    let limit = args.limit.min(HISTORY_CAP);
    if args.json {
        let entries = store.list_history(&config.user_id, limit);
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        print_history(&store, &config.user_id, limit);
    }
    Ok(0)
}

fn run_library(store: &LocalStore, user_id: &str, command: LibraryCommand) -> Result<i32> {
    match command {
        LibraryCommand::List { mine, query } => {
            let liked = store.user_likes(user_id);
            let owner = mine.then_some(user_id);
            let entries = match query.as_deref() {
                Some(query) => store.library_search(query, owner),
                None => store.library_list(owner),
            };
            if entries.is_empty() {
                println!("The library is empty.");
            }
            for entry in entries {
                let heart = if liked.contains(&entry.id) { "♥" } else { " " };
                let visibility = if entry.is_public { "public" } else { "private" };
                println!(
                    "{heart} {}  {}  [{visibility}, {} likes]{}",
                    entry.id,
                    entry.title,
                    entry.like_count,
                    entry
                        .category
                        .as_deref()
                        .map(|category| format!(" #{category}"))
                        .unwrap_or_default()
                );
            }
        }
        LibraryCommand::Add {
            prompt,
            title,
            category,
            private,
            source,
        } => {
            if let Some(source) = source.as_deref() {
                if store.get_record(source).is_none() {
                    bail!("no generation record {source}");
                }
            }
            let entry = store.library_create(NewLibraryEntry {
                user_id: user_id.to_string(),
                prompt,
                title,
                category,
                is_public: Some(!private),
                source_prompt_id: source,
            })?;
            println!("Saved {} ({})", entry.id, entry.title);
        }
        LibraryCommand::Show { id } => {
            let Some(found) = store.library_get_with_images(&id) else {
                bail!("library entry {id} not found");
            };
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
        LibraryCommand::Update {
            id,
            title,
            prompt,
            category,
            public,
        } => {
            let updated = store
                .library_update(
                    &id,
                    LibraryUpdate {
                        title,
                        prompt,
                        category,
                        is_public: public,
                    },
                )?
                .with_context(|| format!("library entry {id} not found"))?;
            println!("Updated {} ({})", updated.id, updated.title);
        }
        LibraryCommand::Delete { id } => {
            if !store.library_delete(&id)? {
                bail!("library entry {id} not found");
            }
            println!("Deleted {id}");
        }
        LibraryCommand::Like { id } => match store.toggle_like(user_id, &id)? {
            LikeState::Liked => println!("Liked {id}"),
            LikeState::Unliked => println!("Unliked {id}"),
        },
        LibraryCommand::Likes => {
            for id in store.user_likes(user_id) {
                println!("{id}");
            }
        }
    }
    Ok(0)
}
