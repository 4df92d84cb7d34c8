//! `cutout-cli` entry point.
//!
//! ## Subcommands
//!
//! - `cutout-cli devices [--json]` - List compute devices
//! - `cutout-cli selftest [N]` - Run N synthetic jobs through the scheduler
//! - `cutout-cli config show|defaults|validate` - Inspect configuration
//! - `cutout-cli version` / `help`

use std::process::ExitCode;

use cutout_runtime::cli::{config_cmd, run_devices, run_selftest};
use cutout_runtime::config;
use cutout_runtime::telemetry;

const DEFAULT_SELFTEST_JOBS: usize = 32;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "devices" => {
            let json = args.get(2).map(|s| s.as_str()) == Some("--json");
            exit_code(run_devices(json))
        }
        "selftest" => {
            let log = config::load().log;
            if let Err(e) = telemetry::init_logging(&log) {
                eprintln!("Logging disabled: {}", e);
            }
            let jobs = match args.get(2) {
                Some(n) => match n.parse::<usize>() {
                    Ok(n) => n,
                    Err(_) => {
                        eprintln!("Invalid job count: {}", n);
                        return ExitCode::from(2u8);
                    }
                },
                None => DEFAULT_SELFTEST_JOBS,
            };
            exit_code(run_selftest(jobs).await)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show();
                    ExitCode::SUCCESS
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => exit_code(config_cmd::run_validate()),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            match args.get(2) {
                Some(subcommand) => print_command_help(subcommand),
                None => print_usage(),
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("cutout-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

fn print_usage() {
    eprintln!(
        "cutout-cli {}

USAGE:
    cutout-cli <COMMAND> [OPTIONS]

COMMANDS:
    devices      List compute devices (--json for machine output)
    selftest     Run synthetic jobs through the scheduler [N, default {}]
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

ENVIRONMENT:
    CUTOUT_LOG_LEVEL     Log filter (default: info)
    CUTOUT_LOG_FORMAT    json or pretty (default: json)
    See `cutout-cli config defaults` for scheduler settings.

EXIT CODES:
    0  Success
    1  Failure
    2  Usage error",
        env!("CARGO_PKG_VERSION"),
        DEFAULT_SELFTEST_JOBS
    );
}

fn print_command_help(command: &str) {
    match command {
        "devices" => eprintln!("cutout-cli devices [--json]\n\nList accelerators, or the CPU fallback when none are found."),
        "selftest" => eprintln!(
            "cutout-cli selftest [N]\n\nSubmit N synthetic images as one batch using the built-in mock engine\nand report the batch summary. Exits 1 on any failure."
        ),
        "config" => eprintln!(
            "cutout-cli config <show|defaults|validate>\n\n  show      Effective values after environment overrides\n  defaults  Documented defaults\n  validate  Warn about risky combinations (exit 1 on warnings)"
        ),
        _ => print_usage(),
    }
}
