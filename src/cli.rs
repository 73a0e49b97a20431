use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "intervene",
    about = "Closed-loop test failure intervention and repository supervision",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect problems in test outcomes, propose fixes and optionally apply them
    Process {
        /// JSON file of outcomes ("-" for stdin)
        outcomes: PathBuf,

        /// Apply and validate the proposed fixes
        #[arg(long)]
        apply: bool,

        /// Directory for the report (default: pipeline.report_dir)
        #[arg(long)]
        report_dir: Option<PathBuf>,

        /// Print the report without saving it
        #[arg(long)]
        no_save: bool,
    },

    /// Supervise the current repository until interrupted
    Watch {
        /// Repository to watch (default: current directory)
        #[arg(long)]
        repo: Option<PathBuf>,
    },

    /// Scan for code structure and naming issues
    Scan {
        /// Directory to scan (default: current directory)
        path: Option<PathBuf>,

        /// Emit JSON instead of a markdown report
        #[arg(long)]
        json: bool,
    },

    /// Replace banned references in text files
    Clean {
        /// Directory to clean (default: current directory)
        path: Option<PathBuf>,

        /// Commit the replacements
        #[arg(long)]
        commit: bool,
    },

    /// Open a pull request for the current branch
    Pr {
        /// Pull request title
        #[arg(long)]
        title: String,

        /// Pull request description
        #[arg(long, default_value = "")]
        body: String,

        /// Reviewer (default: pull_request.reviewer)
        #[arg(long)]
        reviewer: Option<String>,

        /// Target branch (default: pull_request.base_branch)
        #[arg(long)]
        base: Option<String>,
    },

    /// Summarize git state and scan findings for a repository
    Analyze {
        /// Repository path (default: current directory)
        path: Option<PathBuf>,
    },

    /// Answer JSON requests on stdin, one per line
    Serve,

    /// Show project configuration
    Config {
        /// Emit JSON instead of human-readable output
        #[arg(long)]
        json: bool,
    },

    /// Print shell completions
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_flags_parse() {
        let cli = Cli::parse_from(["intervene", "process", "results.json", "--apply", "-vv"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Process {
                outcomes,
                apply,
                report_dir,
                no_save,
            } => {
                assert_eq!(outcomes, PathBuf::from("results.json"));
                assert!(apply);
                assert!(report_dir.is_none());
                assert!(!no_save);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn pr_requires_title() {
        assert!(Cli::try_parse_from(["intervene", "pr"]).is_err());
        let cli = Cli::try_parse_from(["intervene", "pr", "--title", "Ship", "--base", "develop"])
            .unwrap();
        match cli.command {
            Command::Pr { title, base, .. } => {
                assert_eq!(title, "Ship");
                assert_eq!(base.as_deref(), Some("develop"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn completions_accepts_known_shells() {
        let cli = Cli::parse_from(["intervene", "completions", "zsh"]);
        assert!(matches!(
            cli.command,
            Command::Completions {
                shell: CompletionShell::Zsh
            }
        ));
        assert!(Cli::try_parse_from(["intervene", "completions", "tcsh"]).is_err());
    }
}
