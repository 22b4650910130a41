use std::path::PathBuf;

use drive_gallery::sort::{SortMode, ALL_SORTS};
use drive_gallery::RunOptions;

enum Action {
    Exit,
    Tui(RunOptions),
    List(RunOptions, Option<SortMode>),
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = match parse_args(&args) {
        Ok(action) => action,
        Err(message) => {
            eprintln!("error: {message}");
            std::process::exit(2);
        }
    };

    let result = match action {
        Action::Exit => return,
        Action::Tui(options) => drive_gallery::run(options),
        Action::List(options, sort) => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            drive_gallery::list(options, sort, &mut out)
        }
    };
    if let Err(err) = result {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<Action, String> {
    let mut options = RunOptions::default();
    let mut list = false;
    let mut sort = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("Drive Gallery {}", drive_gallery::VERSION);
                return Ok(Action::Exit);
            }
            "--help" | "-h" => {
                print_help();
                return Ok(Action::Exit);
            }
            "--list" => list = true,
            "--sort" => {
                let key = iter.next().ok_or("--sort needs a mode")?;
                sort = Some(SortMode::from_key(key).ok_or_else(|| {
                    format!("unknown sort mode {key:?}; try one of: {}", sort_keys())
                })?);
            }
            "--config" => {
                let path = iter.next().ok_or("--config needs a path")?;
                options.config_file = Some(PathBuf::from(path));
            }
            other => return Err(format!("unrecognized argument {other:?} (see --help)")),
        }
    }
    if list {
        Ok(Action::List(options, sort))
    } else {
        Ok(Action::Tui(options))
    }
}

fn sort_keys() -> String {
    ALL_SORTS
        .iter()
        .map(|mode| mode.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_help() {
    println!(
        "Drive Gallery - Browse and react to a shared Drive folder from the terminal.\n\n  --list               Sync once and print the listing\n  --sort <mode>        Listing order ({})\n  --config <path>      Read settings from this file\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message",
        sort_keys()
    );
}
