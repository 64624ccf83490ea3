use std::{net::SocketAddr, path::PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use kbseek::{EncoderKind, EntryDraft, search::SearchMode};

#[derive(Debug, Parser)]
#[command(
    name = "kbseek",
    about = "Knowledge-base lookup with exact phrase search and semantic fallback"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the sentence-embedding model ID or local model path
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Encoder used for semantic search
    #[arg(long, value_enum, global = true)]
    pub encoder: Option<EncoderKind>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Find the entries most relevant to a phrase
    Search(SearchArgs),
    /// Create a new entry
    Add(AddArgs),
    /// Change fields of an existing entry
    Update(UpdateArgs),
    /// Bulk-load entries from a JSON Lines file
    Import(ImportArgs),
    /// Print one entry
    Get(GetArgs),
    /// List every entry
    List(ListArgs),
    /// Delete an entry
    Remove {
        /// Entry ID
        id: u64,
    },
    /// Regenerate the full-text index from the entry database
    Rebuild,
    /// Show system status and statistics
    Status(StatusArgs),
    /// Manage the sentence-embedding model configuration
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Start MCP server for AI agent integration
    Mcp(McpArgs),
    /// Serve the search API over HTTP
    Serve(ServeArgs),
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Model --

#[derive(Debug, Subcommand)]
pub enum ModelAction {
    /// Show the currently resolved model
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a default model ID or local path in entries.redb
    Set {
        /// Model ID (HuggingFace) or local path
        model: String,
    },
    /// Clear the stored model setting (revert to default)
    Clear,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search phrase
    pub phrase: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,

    /// Retrieval stages to use
    #[arg(long, value_enum, default_value_t = SearchMode::Auto)]
    pub mode: SearchMode,

    /// Drop semantic results scoring below this threshold
    #[arg(long)]
    pub min_score: Option<f32>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Add / Update --

#[derive(Debug, Parser)]
pub struct AddArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub question: String,

    #[arg(long)]
    pub answer: String,

    /// Category the entry belongs to
    #[arg(long)]
    pub category: u64,

    #[arg(long)]
    pub team: Option<u64>,

    /// Display position within the category
    #[arg(long, allow_negative_numbers = true)]
    pub order: Option<i64>,

    /// Store the entry as disabled
    #[arg(long)]
    pub disabled: bool,

    /// Output the created entry as JSON
    #[arg(long)]
    pub json: bool,
}

impl AddArgs {
    pub fn to_draft(&self) -> EntryDraft {
        let mut draft = EntryDraft::new(
            &self.title,
            &self.question,
            &self.answer,
            self.category,
        );
        draft.team_id = self.team;
        draft.order = self.order;
        draft.enabled = !self.disabled;
        draft
    }
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// Entry ID
    pub id: u64,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub question: Option<String>,

    #[arg(long)]
    pub answer: Option<String>,

    #[arg(long)]
    pub category: Option<u64>,

    #[arg(long)]
    pub team: Option<u64>,

    #[arg(long, allow_negative_numbers = true)]
    pub order: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    pub votes: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    pub recommendations: Option<i64>,

    /// Enable or disable the entry
    #[arg(long)]
    pub enabled: Option<bool>,

    /// Output the updated entry as JSON
    #[arg(long)]
    pub json: bool,
}

impl UpdateArgs {
    /// Overlay the given flags on an existing draft.
    pub fn apply(&self, mut draft: EntryDraft) -> EntryDraft {
        if let Some(title) = &self.title {
            draft.title = title.clone();
        }
        if let Some(question) = &self.question {
            draft.question = question.clone();
        }
        if let Some(answer) = &self.answer {
            draft.answer = answer.clone();
        }
        if let Some(category) = self.category {
            draft.category_id = category;
        }
        if self.team.is_some() {
            draft.team_id = self.team;
        }
        if self.order.is_some() {
            draft.order = self.order;
        }
        if let Some(votes) = self.votes {
            draft.votes = votes;
        }
        if let Some(recommendations) = self.recommendations {
            draft.recommendations = recommendations;
        }
        if let Some(enabled) = self.enabled {
            draft.enabled = enabled;
        }
        draft
    }
}

// -- Import --

#[derive(Debug, Parser)]
pub struct ImportArgs {
    /// JSON Lines file, one entry draft per line
    pub file: PathBuf,

    /// Entries written per transaction
    #[arg(long, default_value = "500")]
    pub batch_size: usize,
}

// -- Get / List --

#[derive(Debug, Parser)]
pub struct GetArgs {
    /// Entry ID
    pub id: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct ListArgs {
    /// Output as JSON array
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Mcp --

#[derive(Debug, Parser)]
pub struct McpArgs {
    /// Load the encoder before answering the first tool call
    #[arg(long)]
    pub preload: bool,
}

// -- Serve --

#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,

    /// Load the encoder before accepting requests
    #[arg(long)]
    pub preload: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "kbseek",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["kbseek", "search", "reset password"]);
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.phrase, "reset password");
                assert_eq!(args.count, 5);
                assert_eq!(args.mode, SearchMode::Auto);
                assert!(args.min_score.is_none());
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
        assert!(cli.encoder.is_none());
    }

    #[test]
    fn parse_global_encoder_after_subcommand() {
        let cli = Cli::parse_from([
            "kbseek",
            "search",
            "invoice",
            "--mode",
            "semantic-only",
            "--encoder",
            "hashing",
            "-n",
            "2",
        ]);
        assert_eq!(cli.encoder, Some(EncoderKind::Hashing));
        match cli.command {
            Command::Search(args) => {
                assert_eq!(args.mode, SearchMode::SemanticOnly);
                assert_eq!(args.count, 2);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn add_builds_draft() {
        let cli = Cli::parse_from([
            "kbseek",
            "add",
            "--title",
            "Billing",
            "--question",
            "Where is my invoice?",
            "--answer",
            "Billing tab.",
            "--category",
            "3",
            "--order",
            "-1",
            "--disabled",
        ]);
        let Command::Add(args) = cli.command else {
            panic!("expected add command");
        };
        let draft = args.to_draft();
        assert_eq!(draft.category_id, 3);
        assert_eq!(draft.order, Some(-1));
        assert!(!draft.enabled);
    }

    #[test]
    fn update_only_touches_given_fields() {
        let cli = Cli::parse_from([
            "kbseek", "update", "7", "--title", "New", "--votes", "12",
        ]);
        let Command::Update(args) = cli.command else {
            panic!("expected update command");
        };
        assert_eq!(args.id, 7);

        let draft = args.apply(EntryDraft::new("Old", "Q", "A", 1));
        assert_eq!(draft.title, "New");
        assert_eq!(draft.question, "Q");
        assert_eq!(draft.votes, 12);
        assert!(draft.enabled);
    }

    #[test]
    fn mcp_and_serve_accept_preload() {
        let cli = Cli::parse_from(["kbseek", "mcp", "--preload"]);
        let Command::Mcp(args) = cli.command else {
            panic!("expected mcp command");
        };
        assert!(args.preload);

        let cli = Cli::parse_from(["kbseek", "mcp"]);
        let Command::Mcp(args) = cli.command else {
            panic!("expected mcp command");
        };
        assert!(!args.preload);

        let cli = Cli::parse_from(["kbseek", "serve", "--preload"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert!(args.preload);
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
