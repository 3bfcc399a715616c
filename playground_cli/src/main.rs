//! JS Playground - headless snippet runner.
//!
//! Usage: js-playground [FILE] [--config CONFIG.json]
//!
//! Reads the snippet from FILE, or from stdin when no file is given, runs it
//! against in-memory hosts and prints the run report as JSON.

use std::env;
use std::io::{self, Read};
use std::path::Path;
use std::process::ExitCode;
use std::rc::Rc;

use playground_app::{
    ManualTimers, MemoryConsole, MemoryDom, MemoryNetwork, MonospaceLayout, PlaygroundApp,
    PlaygroundConfig,
};
use playground_core::{Language, SystemClock};
use playground_runtime::{HostContext, LogLevel};

struct Args {
    file: Option<String>,
    config: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = env::args().skip(1);
    let mut parsed = Args {
        file: None,
        config: None,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config = Some(args.next().ok_or("--config needs a path")?);
            }
            _ if arg.starts_with("--") => return Err(format!("unknown option {}", arg)),
            _ if parsed.file.is_none() => parsed.file = Some(arg),
            _ => return Err(format!("unexpected argument {}", arg)),
        }
    }
    Ok(parsed)
}

fn read_source(file: Option<&str>) -> io::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Usage: js-playground [FILE] [--config CONFIG.json]");
            return ExitCode::from(2);
        }
    };

    let config = match &args.config {
        Some(path) => match PlaygroundConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::from(2);
            }
        },
        None => PlaygroundConfig::default(),
    };

    let source = match read_source(args.file.as_deref()) {
        Ok(source) => source,
        Err(e) => {
            log::error!("Failed to read snippet: {}", e);
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    log::info!("Starting JS Playground");

    let host = HostContext::new()
        .with_console(Rc::new(MemoryConsole::new()))
        .with_network(Rc::new(MemoryNetwork::new()))
        .with_dom(Rc::new(MemoryDom::new()))
        .with_timers(Rc::new(ManualTimers::new()));
    let mut app = PlaygroundApp::new(
        config,
        Box::new(MonospaceLayout::default()),
        host,
        Rc::new(SystemClock::new()),
        None,
    );
    if let Some(file) = &args.file {
        app.set_language(Language::from_path(Path::new(file)));
    }
    app.load_text(&source);

    let report = runtime.block_on(async { app.run().await.clone() });
    app.destroy();

    for entry in &report.console {
        if entry.level == LogLevel::Error {
            log::warn!("{}", entry.message);
        }
    }

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            log::error!("Failed to serialize report: {}", e);
            return ExitCode::from(2);
        }
    }

    if report.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
