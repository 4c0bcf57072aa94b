//! Command-line interface for the `chess-accuracy` binary

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::error::WorkerError;
use crate::filter::{ColorFilter, GameFilter};
use crate::store::ACCURACY_ANALYSIS;

#[derive(Parser, Debug)]
#[command(name = "chess-accuracy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-move accuracy of chess games, ranked by Stockfish", long_about = None)]
pub struct Cli {
    /// Print the run summary as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Average move accuracy of a player over matching games
    Accuracy(AnalysisArgs),

    /// Games with the highest combined accuracy of both players
    BestGames {
        #[command(flatten)]
        analysis: AnalysisArgs,

        /// How many games to list
        #[arg(short = 'C', long, default_value_t = 10)]
        count: usize,
    },

    /// Stored accuracy per moving piece; reads earlier `accuracy` results only
    AccuracyPerPiece(AnalysisArgs),

    /// Import games from a PGN file (duplicates are skipped)
    Import {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Clear invalid flags so a player's failed games are retried
    ResetInvalid {
        #[arg(short, long)]
        username: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct AnalysisArgs {
    /// Player whose games are analyzed
    #[arg(short, long)]
    pub username: String,

    #[arg(short, long, value_enum, default_value_t = ColorFilter::Any)]
    pub color: ColorFilter,

    /// Maximum number of games
    #[arg(short, long)]
    pub limit: Option<u64>,

    /// Games analyzed concurrently
    #[arg(short, long, default_value_t = 4)]
    pub worker_count: usize,

    /// Hosts running Stockfish, reached over ssh
    #[arg(short, long, value_delimiter = ',')]
    pub remote_engines: Vec<String>,

    /// First day to include (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Last day to include (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Allowed TimeControl header values
    #[arg(long, value_delimiter = ',')]
    pub time_control: Vec<String>,

    /// Allowed Variant header values
    #[arg(long, value_delimiter = ',')]
    pub variant: Vec<String>,

    /// Overrides THINK_TIME_MS
    #[arg(long)]
    pub think_time_ms: Option<u64>,

    /// Overrides LOCAL_ENGINES
    #[arg(long)]
    pub local_engines: Option<usize>,
}

impl AnalysisArgs {
    pub fn to_filter(&self) -> Result<GameFilter, WorkerError> {
        if self.username.trim().is_empty() {
            return Err(WorkerError::Config("username must not be empty".into()));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(WorkerError::Config(format!(
                    "start date {start} is after end date {end}"
                )));
            }
        }

        Ok(GameFilter {
            username: self.username.trim().to_string(),
            color: self.color,
            start: self.start_date.and_then(|d| d.and_hms_opt(0, 0, 0)),
            end: self.end_date.and_then(|d| d.and_hms_opt(23, 59, 59)),
            time_controls: self.time_control.clone(),
            variants: self.variant.clone(),
            limit: self.limit,
            exclude_invalid_for: Some(ACCURACY_ANALYSIS.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_args() {
        let cli = Cli::try_parse_from([
            "chess-accuracy",
            "accuracy",
            "-u",
            "magnus",
            "-c",
            "black",
            "-w",
            "8",
            "--remote-engines",
            "10.0.0.2,10.0.0.3",
            "--start-date",
            "2024-01-01",
        ])
        .unwrap();

        let Command::Accuracy(args) = cli.command else {
            panic!("expected accuracy command");
        };
        assert_eq!(args.worker_count, 8);
        assert_eq!(args.remote_engines, vec!["10.0.0.2", "10.0.0.3"]);

        let filter = args.to_filter().unwrap();
        assert_eq!(filter.color, ColorFilter::Black);
        assert_eq!(filter.exclude_invalid_for.as_deref(), Some(ACCURACY_ANALYSIS));
        assert_eq!(
            filter.start,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
    }

    #[test]
    fn test_username_is_required() {
        assert!(Cli::try_parse_from(["chess-accuracy", "accuracy"]).is_err());
    }

    #[test]
    fn test_bad_date_rejected() {
        assert!(Cli::try_parse_from([
            "chess-accuracy",
            "accuracy",
            "-u",
            "x",
            "--start-date",
            "yesterday"
        ])
        .is_err());
    }

    #[test]
    fn test_inverted_range_is_config_error() {
        let cli = Cli::try_parse_from([
            "chess-accuracy",
            "accuracy",
            "-u",
            "x",
            "--start-date",
            "2024-02-01",
            "--end-date",
            "2024-01-01",
        ])
        .unwrap();
        let Command::Accuracy(args) = cli.command else {
            panic!("expected accuracy command");
        };
        assert!(matches!(args.to_filter(), Err(WorkerError::Config(_))));
    }

    #[test]
    fn test_best_games_count() {
        let cli = Cli::try_parse_from(["chess-accuracy", "best-games", "-u", "x", "-C", "3"]).unwrap();
        let Command::BestGames { count, analysis } = cli.command else {
            panic!("expected best-games command");
        };
        assert_eq!(count, 3);
        assert_eq!(analysis.worker_count, 4);
    }

    #[test]
    fn test_accuracy_per_piece_args() {
        let cli = Cli::try_parse_from(["chess-accuracy", "--json", "accuracy-per-piece", "-u", "x", "-l", "5"])
            .unwrap();
        assert!(cli.json);
        let Command::AccuracyPerPiece(args) = cli.command else {
            panic!("expected accuracy-per-piece command");
        };
        assert_eq!(args.to_filter().unwrap().limit, Some(5));
    }
}
