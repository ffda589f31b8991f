//! # POSIX Host Daemon
//!
//! Main entry point for the POSIX resource server host.

use posixd::{DaemonConfig, DaemonRuntime};
use services_logger::LogLevel;
use services_posix::ServerConfig;
use std::env;
use std::fs;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map_or("posixd", String::as_str);

    let config = parse_args(&args).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(program);
        process::exit(1);
    });

    let mut runtime = DaemonRuntime::new(config).unwrap_or_else(|e| {
        eprintln!("Failed to start server: {}", e);
        process::exit(1);
    });

    for path in runtime.published() {
        println!("published {}", path);
    }

    let result = runtime.run();
    for line in runtime.transcript() {
        println!("{}", line);
    }
    runtime.shutdown();

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        process::exit(1);
    }
}

fn parse_args(args: &[String]) -> Result<DaemonConfig, String> {
    let mut config = DaemonConfig::default();
    let mut workers = None;
    let mut verbose = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --config".to_string());
                }
                let text = fs::read_to_string(&args[i])
                    .map_err(|e| format!("Failed to read config file: {}", e))?;
                config.server = ServerConfig::from_json(&text).map_err(|e| e.to_string())?;
            }
            "--workers" | "-w" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --workers".to_string());
                }
                workers = Some(
                    args[i]
                        .parse()
                        .map_err(|_| format!("Invalid workers value: {}", args[i]))?,
                );
            }
            "--script" | "-s" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing value for --script".to_string());
                }
                let script_text = fs::read_to_string(&args[i])
                    .map_err(|e| format!("Failed to read script file: {}", e))?;
                config.script = Some(script_text);
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                return Err(format!("Unknown option: {}", other));
            }
        }
        i += 1;
    }

    // Command-line flags win over the config file, whatever their order.
    if let Some(workers) = workers {
        config.server.workers = workers;
    }
    if verbose {
        config.server.log_level = LogLevel::Debug;
        config.server.log_to_stderr = true;
    }
    config.server.validate().map_err(|e| e.to_string())?;

    Ok(config)
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      Server configuration (JSON)");
    eprintln!("  -w, --workers <N>        Dispatcher threads (overrides the config file)");
    eprintln!("  -s, --script <FILE>      Session script to play against the server");
    eprintln!("  -v, --verbose            Log at debug level to stderr");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {} --script demos/pipe_echo.posix", program);
    eprintln!("  {} --config posixd.json --workers 2 --verbose", program);
}
