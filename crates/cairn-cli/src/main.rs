//! cairn - streaming terminal agent

mod attach;
mod config;
mod markdown;
mod store;
mod terminal;
mod theme;
mod tools;

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use cairn_agent::{
    AgentSession, ConversationStore, DEFAULT_RECURSION_BUDGET, Outcome, SessionConfig,
    ToolDispatcher, ToolRegistry,
};
use cairn_ai::{Content, Model, Provider, ReasoningLevel};
use clap::Parser;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;

use config::{AgentProfile, Config};
use store::JsonlStore;
use terminal::TerminalSink;
use theme::Theme;

const DEFAULT_PROVIDER: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Consecutive hand-offs allowed for one request
const MAX_HANDOFFS: usize = 8;

/// cairn - streams answers from a language model and runs its tool calls
#[derive(Parser, Debug)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Prompt to send; without one, prompts are read line by line from stdin
    prompt: Option<String>,

    /// Model to use (default: claude-sonnet-4-5-20250929)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (anthropic, openai, groq, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// Thinking level (off, low, medium, high)
    #[arg(short, long)]
    thinking: Option<String>,

    /// Maximum model turns per request
    #[arg(short = 'n', long)]
    recursion_budget: Option<u32>,

    /// System prompt
    #[arg(short, long)]
    system: Option<String>,

    /// Attach a file to the first prompt (repeatable)
    #[arg(short, long)]
    attach: Vec<PathBuf>,

    /// Tools the model may use, comma separated
    #[arg(long, value_delimiter = ',')]
    tools: Option<Vec<String>>,

    /// Apply file changes without asking
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Write the final answer to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Only print the answer
    #[arg(short, long)]
    quiet: bool,

    /// Conversation to continue (default: a new one)
    #[arg(short, long)]
    conversation: Option<String>,

    /// Agent profile from the config file
    #[arg(long)]
    agent: Option<String>,

    /// List saved conversations
    #[arg(long)]
    list: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        match Config::init() {
            Ok(path) => {
                println!("Config file at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    if args.list {
        return list_conversations();
    }

    let config = Config::load();
    let mut app = App::new(args, config)?;

    let ok = match app.args.prompt.clone() {
        Some(prompt) => {
            let attachments = attach::load_attachments(app.args.attach.as_slice()).await?;
            app.request(prompt, attachments).await?
        }
        None => app.interactive().await?,
    };

    if !ok {
        // the session already rendered its error
        std::process::exit(1);
    }
    Ok(())
}

/// Logs go to stderr, and only when asked for
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("cairn=debug,cairn_agent=debug,cairn_ai=debug")
    } else if std::env::var_os("RUST_LOG").is_some() {
        EnvFilter::from_default_env()
    } else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn list_conversations() -> anyhow::Result<()> {
    let conversations = JsonlStore::list(&JsonlStore::conversations_dir())?;
    if conversations.is_empty() {
        println!("No saved conversations");
        return Ok(());
    }

    for info in conversations {
        println!(
            "{}  {}  {}  {} messages  {}",
            info.created_at_display(),
            info.name,
            info.model,
            info.message_count,
            info.working_dir
        );
    }
    Ok(())
}

/// Look up a model, falling back to a custom entry for unknown ids
fn resolve_model(provider: &str, model_id: &str) -> anyhow::Result<Model> {
    let provider = Provider::from_id(provider).ok_or_else(|| {
        anyhow!(
            "unknown provider '{}' (expected anthropic, openai, groq, openrouter, ollama or custom)",
            provider
        )
    })?;

    Ok(cairn_ai::models::get_model(provider, model_id)
        .or_else(|| {
            cairn_ai::models::get_model_by_id(model_id).filter(|m| m.provider == provider)
        })
        .unwrap_or_else(|| Model::custom(provider, model_id)))
}

/// Key from the config file, or `None` when the provider reads it from the
/// environment itself. Fails early when neither has one.
fn resolve_api_key(config: &Config, provider: Provider) -> anyhow::Result<Option<String>> {
    if let Some(key) = config.api_key(provider) {
        return Ok(Some(key));
    }
    match provider.api_key_env_var() {
        Some(var) if std::env::var(var).map_or(true, |v| v.is_empty()) => bail!(
            "No API key found for {}\n\nSet your API key with: export {}=your-key\nOr add it to the config file: cairn --init-config",
            provider.name(),
            var
        ),
        _ => Ok(None),
    }
}

fn default_system_prompt(tool_names: &[String]) -> String {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());

    format!(
        "You are cairn, an assistant working in a terminal.\n\n\
         Current working directory: {}\n\
         Available tools: {}\n\n\
         Read files before changing them. Keep answers short and concrete.",
        cwd,
        tool_names.join(", ")
    )
}

/// Process-wide state shared by every request
struct App {
    args: Args,
    config: Config,
    tools: Arc<ToolRegistry>,
    store: Arc<JsonlStore>,
    sink: TerminalSink,
}

impl App {
    fn new(args: Args, config: Config) -> anyhow::Result<Self> {
        if let Some(agent) = &args.agent
            && !config.agents.contains_key(agent)
        {
            bail!("unknown agent profile '{}'", agent);
        }

        let agent_names: Vec<String> = config.agents.keys().cloned().collect();
        let tools = Arc::new(ToolRegistry::new(tools::builtin_tools(agent_names)));

        let name = args
            .conversation
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let model_id = args
            .model
            .clone()
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let store = JsonlStore::open(&name, &model_id, config.redact_tool_results())
            .with_context(|| format!("failed to open conversation '{}'", name))?;
        tracing::debug!(path = %store.path().display(), "conversation store opened");

        let theme = Theme::by_name(config.theme.as_deref().unwrap_or("dark"));
        let sink = TerminalSink::stdout(theme, config.markdown.unwrap_or(true));

        Ok(Self {
            args,
            config,
            tools,
            store: Arc::new(store),
            sink,
        })
    }

    fn profile(&self, name: Option<&str>) -> anyhow::Result<Option<&AgentProfile>> {
        name.map(|name| {
            self.config
                .agents
                .get(name)
                .ok_or_else(|| anyhow!("unknown agent profile '{}'", name))
        })
        .transpose()
    }

    /// Session settings: an active profile wins over flags, flags win over the
    /// config file.
    fn session_config(
        &self,
        profile: Option<&AgentProfile>,
        prompt: String,
        attachments: Vec<Content>,
    ) -> anyhow::Result<SessionConfig> {
        let args = &self.args;
        let config = &self.config;

        let provider = profile
            .and_then(|p| p.provider.clone())
            .or_else(|| args.provider.clone())
            .or_else(|| config.provider.clone())
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string());
        let model_id = profile
            .and_then(|p| p.model.clone())
            .or_else(|| args.model.clone())
            .or_else(|| config.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model = resolve_model(&provider, &model_id)?;

        let thinking_level = match args.thinking.as_ref().or(config.thinking_level.as_ref()) {
            Some(level) => level.parse::<ReasoningLevel>().map_err(|e| anyhow!(e))?,
            None => ReasoningLevel::Off,
        };

        let system_prompt = match profile.and_then(|p| p.system_prompt.clone()) {
            Some(prompt) => prompt,
            None => match &args.system {
                Some(prompt) => prompt.clone(),
                None => config
                    .resolve_system_prompt()
                    .context("failed to read system prompt file")?
                    .unwrap_or_else(|| default_system_prompt(self.tools.names())),
            },
        };

        let mut session = SessionConfig::new(model, prompt);
        session.api_key = resolve_api_key(config, session.model.provider)?;
        session.attachments = attachments;
        session.system_prompt = system_prompt;
        session.enabled_tools = profile
            .and_then(|p| p.enabled_tools.clone())
            .or_else(|| args.tools.clone())
            .or_else(|| config.enabled_tools.clone());
        session.recursion_budget = args
            .recursion_budget
            .or(config.recursion_budget)
            .unwrap_or(DEFAULT_RECURSION_BUDGET);
        session.thinking_level = thinking_level;
        session.auto_approve_tools = args.yes || config.auto_approve_tools.unwrap_or(false);
        session.output_file = args.output.clone();
        session.quiet = args.quiet || config.quiet.unwrap_or(false);
        session.conversation_name = self.store.name().to_string();
        Ok(session)
    }

    /// Run one prompt, following hand-offs. `Ok(false)` when the session
    /// failed after reporting its error.
    async fn request(&mut self, prompt: String, attachments: Vec<Content>) -> anyhow::Result<bool> {
        let mut agent = self.args.agent.clone();
        let mut prompt = prompt;
        let mut attachments = attachments;

        for _ in 0..=MAX_HANDOFFS {
            let session = self.session_config(self.profile(agent.as_deref())?, prompt, attachments)?;
            let provider = cairn_ai::providers::provider_for(session.model.api);
            let tools: Arc<dyn ToolDispatcher> = self.tools.clone();
            let store: Arc<dyn ConversationStore> = self.store.clone();

            match AgentSession::new(session, provider, tools, store)
                .run(&mut self.sink)
                .await
            {
                Ok(Outcome::Completed) => return Ok(true),
                Ok(Outcome::SwitchAgent(handoff)) => {
                    tracing::info!(target_agent = %handoff.target, "switching agent");
                    agent = Some(handoff.target);
                    prompt = handoff.instruction;
                    attachments = Vec::new();
                }
                Err(e) => {
                    tracing::debug!(error = %e, "session failed");
                    return Ok(false);
                }
            }
        }

        bail!("stopped after {} consecutive agent hand-offs", MAX_HANDOFFS)
    }

    /// Read prompts from stdin until EOF, all in one conversation
    async fn interactive(&mut self) -> anyhow::Result<bool> {
        let prompting = std::io::stdin().is_terminal();
        let attachments = attach::load_attachments(self.args.attach.as_slice()).await?;
        let mut session = Interactive {
            app: self,
            attachments,
        };

        prompt_loop(&mut session, || async move {
            if prompting {
                eprint!("> ");
                std::io::stderr().flush()?;
            }
            terminal::read_stdin_line().await
        })
        .await
    }
}

/// Something that answers one prompt; `Ok(false)` when it failed after
/// reporting the error itself
#[async_trait]
trait PromptRunner {
    async fn run_prompt(&mut self, prompt: String) -> anyhow::Result<bool>;
}

/// The stdin loop's view of the app: attachments go with the first prompt
struct Interactive<'a> {
    app: &'a mut App,
    attachments: Vec<Content>,
}

#[async_trait]
impl PromptRunner for Interactive<'_> {
    async fn run_prompt(&mut self, prompt: String) -> anyhow::Result<bool> {
        let ok = self
            .app
            .request(prompt, std::mem::take(&mut self.attachments))
            .await?;
        println!();
        Ok(ok)
    }
}

/// Feed lines to `runner` until EOF or `exit`. Fails overall if any prompt
/// failed.
async fn prompt_loop<R, F, Fut>(runner: &mut R, mut next_line: F) -> anyhow::Result<bool>
where
    R: PromptRunner + Send,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<Option<String>>>,
{
    let mut ok = true;
    while let Some(line) = next_line().await? {
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "exit" | "quit") {
            break;
        }
        ok &= runner.run_prompt(prompt.to_string()).await?;
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["cairn"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_args_parse() {
        let args = args(&["-m", "gpt-4o", "--tools", "read_file,list_dir", "-a", "a.txt", "-a", "b.png", "hi"]);
        assert_eq!(args.prompt.as_deref(), Some("hi"));
        assert_eq!(args.model.as_deref(), Some("gpt-4o"));
        assert_eq!(
            args.tools,
            Some(vec!["read_file".to_string(), "list_dir".to_string()])
        );
        assert_eq!(args.attach.len(), 2);
        assert!(!args.yes);
    }

    #[test]
    fn test_resolve_known_model() {
        let model = resolve_model("anthropic", DEFAULT_MODEL).unwrap();
        assert_eq!(model.provider, Provider::Anthropic);
        assert_eq!(model.id, DEFAULT_MODEL);
    }

    #[test]
    fn test_resolve_custom_model() {
        let model = resolve_model("ollama", "llama3.2").unwrap();
        assert_eq!(model.provider, Provider::Ollama);
        assert_eq!(model.id, "llama3.2");
    }

    #[test]
    fn test_unknown_provider() {
        assert!(resolve_model("nope", "x").is_err());
    }

    #[test]
    fn test_config_key_needs_no_env() {
        let mut config = Config::default();
        config.api_keys.groq = Some("gsk-test".into());
        assert_eq!(
            resolve_api_key(&config, Provider::Groq).unwrap().as_deref(),
            Some("gsk-test")
        );
        // ollama runs locally without a key
        assert!(resolve_api_key(&config, Provider::Ollama).unwrap().is_none());
    }

    /// Answers with a scripted result per prompt
    struct ScriptedRunner {
        results: Vec<bool>,
        seen: Vec<String>,
    }

    #[async_trait]
    impl PromptRunner for ScriptedRunner {
        async fn run_prompt(&mut self, prompt: String) -> anyhow::Result<bool> {
            self.seen.push(prompt);
            Ok(self.results.remove(0))
        }
    }

    async fn run_lines(lines: &[&str], results: Vec<bool>) -> (bool, Vec<String>) {
        let mut lines: std::collections::VecDeque<String> =
            lines.iter().map(|l| format!("{}\n", l)).collect();
        let mut runner = ScriptedRunner {
            results,
            seen: vec![],
        };
        let ok = prompt_loop(&mut runner, || {
            let line = lines.pop_front();
            async move { Ok(line) }
        })
        .await
        .unwrap();
        (ok, runner.seen)
    }

    #[tokio::test]
    async fn test_earlier_failure_sets_exit_status() {
        let (ok, seen) = run_lines(&["first", "second"], vec![false, true]).await;
        assert!(!ok);
        assert_eq!(seen, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_blank_lines_skipped_and_exit_stops() {
        let (ok, seen) = run_lines(&["", "  hi  ", "exit", "ignored"], vec![true]).await;
        assert!(ok);
        assert_eq!(seen, vec!["hi"]);
    }
}
