//! # linkfold
//!
//! Command-line front end for the hardlink consolidation engine.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::Parser;
use linkfold_core::{run_with, CancelFlag, NoProgress, Options, Progress};
use tracing_subscriber::EnvFilter;

mod config;
mod progress;

use config::FileConfig;
use progress::TtyProgress;

/// Find files with identical content and merge them into hardlinks.
///
/// Without --link this is a dry run: the report shows what would be linked
/// and how much space it would reclaim, but nothing on disk changes.
#[derive(Debug, Parser)]
#[command(name = "linkfold", version, about)]
struct Cli {
    /// Directory roots to scan
    #[arg(value_name = "DIR", required = true)]
    dirs: Vec<PathBuf>,

    /// Perform the linking (default is a dry run)
    #[arg(long)]
    link: bool,

    /// Only link files with matching filenames
    #[arg(long)]
    same_name: bool,

    /// Allow linking files with differing mtimes
    #[arg(long)]
    ignore_time: bool,

    /// Allow linking files with differing mode bits
    #[arg(long)]
    ignore_perm: bool,

    /// Allow linking files with differing uid or gid
    #[arg(long)]
    ignore_owner: bool,

    /// Allow linking files with differing extended attributes
    #[arg(long)]
    ignore_xattr: bool,

    /// Compare content only (implies all the --ignore flags)
    #[arg(long)]
    content_only: bool,

    /// Minimum file size to consider
    #[arg(long, value_name = "BYTES")]
    min_size: Option<u64>,

    /// Maximum file size to consider (0 = unbounded)
    #[arg(long, value_name = "BYTES")]
    max_size: Option<u64>,

    /// Keep the surviving inode's own mtime and owner instead of adopting
    /// the newest
    #[arg(long)]
    no_newest: bool,

    /// Bucket length that switches on content digests (-1 disables)
    #[arg(long, value_name = "N")]
    search_thresh: Option<i64>,

    /// Re-stat files before linking (always on when linking)
    #[arg(long)]
    check_quiescence: bool,

    /// Continue past directory walk errors
    #[arg(long)]
    ignore_walk_errors: bool,

    /// Continue past link errors
    #[arg(long)]
    ignore_link_errors: bool,

    /// Exclude filenames matching REGEX (repeatable)
    #[arg(long = "exclude", value_name = "REGEX")]
    excludes: Vec<String>,

    /// Include filenames matching REGEX, overriding excludes (repeatable)
    #[arg(long = "include", value_name = "REGEX")]
    includes: Vec<String>,

    /// Prune directories matching REGEX from the walk (repeatable)
    #[arg(long = "exclude-dir", value_name = "REGEX")]
    exclude_dirs: Vec<String>,

    /// Emit machine-readable JSON instead of the report
    #[arg(long)]
    json: bool,

    /// Increase report verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Debug statistics level in the report
    #[arg(long, value_name = "N", default_value_t = 0)]
    debug: u8,

    /// Suppress the progress meter
    #[arg(short, long)]
    quiet: bool,

    /// Use an alternate config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn build_options(cli: &Cli, file: &FileConfig) -> Options {
    let defaults = Options::default();
    let mut options = Options {
        same_name: cli.same_name || file.defaults.same_name.unwrap_or(false),
        ignore_time: cli.ignore_time || file.defaults.ignore_time.unwrap_or(false),
        ignore_perm: cli.ignore_perm,
        ignore_owner: cli.ignore_owner,
        ignore_xattr: cli.ignore_xattr,
        content_only: cli.content_only,
        linking_enabled: cli.link,
        min_file_size: cli
            .min_size
            .or(file.defaults.min_file_size)
            .unwrap_or(defaults.min_file_size),
        max_file_size: cli
            .max_size
            .or(file.defaults.max_file_size)
            .unwrap_or(defaults.max_file_size),
        use_newest_link: if cli.no_newest {
            false
        } else {
            file.defaults
                .use_newest_link
                .unwrap_or(defaults.use_newest_link)
        },
        search_thresh: cli
            .search_thresh
            .or(file.defaults.search_thresh)
            .unwrap_or(defaults.search_thresh),
        check_quiescence: cli.check_quiescence,
        ignore_walk_errors: cli.ignore_walk_errors,
        ignore_link_errors: cli.ignore_link_errors,
        verbosity: cli.verbose,
        debug_level: cli.debug,
        ..defaults
    };
    options.file_includes = file.walk.includes.clone();
    options.file_includes.extend(cli.includes.iter().cloned());
    options.file_excludes = file.walk.excludes.clone();
    options.file_excludes.extend(cli.excludes.iter().cloned());
    options.dir_excludes = file.walk.dir_excludes.clone();
    options.dir_excludes.extend(cli.exclude_dirs.iter().cloned());
    options
}

fn init_logging(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

static CANCEL: OnceLock<CancelFlag> = OnceLock::new();

extern "C" fn handle_interrupt(_signum: libc::c_int) {
    if let Some(flag) = CANCEL.get() {
        flag.cancel();
    }
}

fn install_interrupt_handler(flag: &CancelFlag) {
    let _ = CANCEL.set(flag.clone());
    let handler = handle_interrupt as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let file_config = config::load(cli.config.as_deref())?;
    let options = build_options(&cli, &file_config);

    let cancel = CancelFlag::new();
    install_interrupt_handler(&cancel);

    let mut tty;
    let mut none = NoProgress;
    let progress: &mut dyn Progress =
        if cli.quiet || cli.json || !std::io::stderr().is_terminal() {
            &mut none
        } else {
            tty = TtyProgress::new();
            &mut tty
        };

    let results = run_with(&cli.dirs, &options, progress, &cancel)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string(&results).context("serializing results")?
        );
    } else {
        results.output_results();
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("linkfold: {err:#}");
            let code = match err.downcast_ref::<linkfold_core::Error>() {
                Some(linkfold_core::Error::Validation(_))
                | Some(linkfold_core::Error::Pattern { .. }) => 1,
                _ => 2,
            };
            ExitCode::from(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults_are_a_dry_run() {
        let cli = parse(&["linkfold", "/tmp"]);
        let options = build_options(&cli, &FileConfig::default());
        assert!(!options.linking_enabled);
        assert_eq!(options.min_file_size, 1);
        assert_eq!(options.search_thresh, 1);
        assert!(options.use_newest_link);
    }

    #[test]
    fn link_flag_enables_linking() {
        let cli = parse(&["linkfold", "--link", "/tmp"]);
        let options = build_options(&cli, &FileConfig::default());
        assert!(options.linking_enabled);
    }

    #[test]
    fn content_only_flag_carries_through() {
        let cli = parse(&["linkfold", "--content-only", "/tmp"]);
        let options = build_options(&cli, &FileConfig::default());
        let validated = options.validate().unwrap();
        assert!(validated.ignore_time && validated.ignore_xattr);
    }

    #[test]
    fn cli_sizes_override_config_file() {
        let cli = parse(&["linkfold", "--min-size", "500", "/tmp"]);
        let file = FileConfig {
            defaults: config::DefaultsConfig {
                min_file_size: Some(100),
                max_file_size: Some(9000),
                ..Default::default()
            },
            ..Default::default()
        };
        let options = build_options(&cli, &file);
        assert_eq!(options.min_file_size, 500);
        assert_eq!(options.max_file_size, 9000);
    }

    #[test]
    fn no_newest_beats_config_file() {
        let cli = parse(&["linkfold", "--no-newest", "/tmp"]);
        let file = FileConfig {
            defaults: config::DefaultsConfig {
                use_newest_link: Some(true),
                ..Default::default()
            },
            ..Default::default()
        };
        let options = build_options(&cli, &file);
        assert!(!options.use_newest_link);
    }

    #[test]
    fn patterns_merge_config_then_cli() {
        let cli = parse(&[
            "linkfold",
            "--exclude",
            "cli-pattern",
            "--exclude-dir",
            "^\\.git$",
            "/tmp",
        ]);
        let file = FileConfig {
            walk: config::WalkConfig {
                excludes: vec!["file-pattern".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let options = build_options(&cli, &file);
        assert_eq!(options.file_excludes, vec!["file-pattern", "cli-pattern"]);
        assert_eq!(options.dir_excludes, vec!["^\\.git$"]);
    }

    #[test]
    fn repeated_verbose_counts() {
        let cli = parse(&["linkfold", "-vvv", "/tmp"]);
        assert_eq!(cli.verbose, 3);
    }

    #[test]
    fn dirs_are_required() {
        assert!(Cli::try_parse_from(["linkfold"]).is_err());
    }
}
