// mixctl: command-line front end for the mixer engine

use std::env;
use std::process::ExitCode;

use env_logger::Env;
use log::debug;
use serde_json::{json, Value};

use mixer_control::{AudioController, AudioError, AudioSession, BackendConfig, Endpoint};

const USAGE: &str = "\
usage: mixctl [--json] [--client-name <name>] <command>

commands:
  platform
  master [get | set <0..1> | mute [on|off] | unmute | toggle | level | name]
  mic    [get | set <0..1> | mute [on|off] | unmute | toggle | level | name]
  apps
  app <pid> [get | set <0..1> | mute [on|off] | unmute | level]";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Help,
    Platform,
    Endpoint(Endpoint, EndpointAction),
    Apps,
    App(u32, AppAction),
}

#[derive(Debug, Clone, PartialEq)]
enum EndpointAction {
    Get,
    Set(f64),
    Mute(bool),
    Toggle,
    Level,
    Name,
}

#[derive(Debug, Clone, PartialEq)]
enum AppAction {
    Get,
    Set(f64),
    Mute(bool),
    Level,
}

#[derive(Debug, Clone, PartialEq)]
struct Options {
    json: bool,
    client_name: Option<String>,
    command: Command,
}

/// Result of one command, rendered either for a terminal or as JSON.
struct Report {
    text: String,
    json: Value,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut json = false;
    let mut client_name = None;
    let mut words: Vec<&str> = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--client-name" => {
                let name = iter
                    .next()
                    .ok_or_else(|| "--client-name needs a value".to_string())?;
                client_name = Some(name.clone());
            }
            "-h" | "--help" => {
                return Ok(Options {
                    json,
                    client_name,
                    command: Command::Help,
                })
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            word => words.push(word),
        }
    }

    let command = match words.as_slice() {
        [] | ["help"] => Command::Help,
        ["platform"] => Command::Platform,
        ["master", rest @ ..] => Command::Endpoint(Endpoint::MasterOutput, parse_endpoint_action(rest)?),
        ["mic", rest @ ..] => Command::Endpoint(Endpoint::DefaultCapture, parse_endpoint_action(rest)?),
        ["apps"] => Command::Apps,
        ["app", pid, rest @ ..] => {
            let pid = pid
                .parse::<u32>()
                .map_err(|_| format!("invalid pid {:?}", pid))?;
            Command::App(pid, parse_app_action(rest)?)
        }
        ["app"] => return Err("app needs a pid".to_string()),
        other => return Err(format!("unknown command {:?}", other.join(" "))),
    };

    Ok(Options {
        json,
        client_name,
        command,
    })
}

fn parse_level(word: &str) -> Result<f64, String> {
    word.parse::<f64>()
        .map_err(|_| format!("invalid volume {:?}", word))
}

fn parse_mute(rest: &[&str]) -> Result<bool, String> {
    match rest {
        [] | ["on"] => Ok(true),
        ["off"] => Ok(false),
        other => Err(format!("expected on or off, got {:?}", other.join(" "))),
    }
}

fn parse_endpoint_action(rest: &[&str]) -> Result<EndpointAction, String> {
    match rest {
        [] | ["get"] => Ok(EndpointAction::Get),
        ["set", level] => parse_level(level).map(EndpointAction::Set),
        ["mute", state @ ..] => parse_mute(state).map(EndpointAction::Mute),
        ["unmute"] => Ok(EndpointAction::Mute(false)),
        ["toggle"] => Ok(EndpointAction::Toggle),
        ["level"] => Ok(EndpointAction::Level),
        ["name"] => Ok(EndpointAction::Name),
        other => Err(format!("unknown action {:?}", other.join(" "))),
    }
}

fn parse_app_action(rest: &[&str]) -> Result<AppAction, String> {
    match rest {
        [] | ["get"] => Ok(AppAction::Get),
        ["set", level] => parse_level(level).map(AppAction::Set),
        ["mute", state @ ..] => parse_mute(state).map(AppAction::Mute),
        ["unmute"] => Ok(AppAction::Mute(false)),
        ["level"] => Ok(AppAction::Level),
        other => Err(format!("unknown action {:?}", other.join(" "))),
    }
}

fn run(controller: &AudioController, command: &Command) -> Result<Report, AudioError> {
    match command {
        Command::Help => Ok(Report {
            text: USAGE.to_string(),
            json: json!({ "usage": USAGE }),
        }),
        Command::Platform => {
            let platform = controller.get_platform();
            Ok(Report {
                text: platform.to_string(),
                json: json!({ "platform": platform }),
            })
        }
        Command::Endpoint(endpoint, action) => run_endpoint(controller, *endpoint, action),
        Command::Apps => {
            let apps = controller.get_active_audio_apps()?;
            Ok(Report {
                text: format_apps(&apps),
                json: json!({
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "apps": apps,
                }),
            })
        }
        Command::App(pid, action) => run_app(controller, *pid, action),
    }
}

fn run_endpoint(
    controller: &AudioController,
    endpoint: Endpoint,
    action: &EndpointAction,
) -> Result<Report, AudioError> {
    let master = endpoint == Endpoint::MasterOutput;
    match action {
        EndpointAction::Get => {
            let (volume, muted) = if master {
                (controller.get_master_volume()?, controller.is_master_muted()?)
            } else {
                (controller.get_microphone_volume()?, controller.is_microphone_muted()?)
            };
            Ok(volume_report(volume, muted))
        }
        EndpointAction::Set(level) => {
            let applied = if master {
                controller.set_master_volume(*level)?
            } else {
                controller.set_microphone_volume(*level)?
            };
            Ok(volume_only_report(applied))
        }
        EndpointAction::Mute(muted) => {
            if master {
                controller.set_master_mute(*muted)?;
            } else {
                controller.set_microphone_mute(*muted)?;
            }
            Ok(mute_report(*muted))
        }
        EndpointAction::Toggle => {
            let muted = if master {
                controller.toggle_master_mute()?
            } else {
                controller.toggle_microphone_mute()?
            };
            Ok(mute_report(muted))
        }
        EndpointAction::Level => {
            let peak = if master {
                controller.get_master_audio_level()?
            } else {
                controller.get_microphone_audio_level()?
            };
            Ok(Report {
                text: format!("{:.3}", peak),
                json: json!({ "peak": peak }),
            })
        }
        EndpointAction::Name => {
            let name = if master {
                controller.get_master_device_name()?
            } else {
                controller.get_microphone_device_name()?
            };
            Ok(Report {
                text: name.clone(),
                json: json!({ "name": name }),
            })
        }
    }
}

fn run_app(controller: &AudioController, pid: u32, action: &AppAction) -> Result<Report, AudioError> {
    match action {
        AppAction::Get => {
            let app = controller.find_app(pid)?;
            Ok(Report {
                text: format_apps(std::slice::from_ref(&app)),
                json: json!(app),
            })
        }
        AppAction::Set(level) => Ok(volume_only_report(controller.set_app_volume(pid, *level)?)),
        AppAction::Mute(muted) => {
            controller.set_app_mute(pid, *muted)?;
            Ok(mute_report(*muted))
        }
        AppAction::Level => {
            let peak = controller.get_app_audio_level(pid)?;
            Ok(Report {
                text: format!("{:.3}", peak),
                json: json!({ "pid": pid, "peak": peak }),
            })
        }
    }
}

fn volume_report(volume: f64, muted: bool) -> Report {
    Report {
        text: format!("{:.0}%{}", volume * 100.0, if muted { " (muted)" } else { "" }),
        json: json!({ "volume": volume, "muted": muted }),
    }
}

fn volume_only_report(volume: f64) -> Report {
    Report {
        text: format!("{:.0}%", volume * 100.0),
        json: json!({ "volume": volume }),
    }
}

fn mute_report(muted: bool) -> Report {
    Report {
        text: if muted { "muted" } else { "unmuted" }.to_string(),
        json: json!({ "muted": muted }),
    }
}

fn format_apps(apps: &[AudioSession]) -> String {
    if apps.is_empty() {
        return "no applications are playing audio".to_string();
    }
    apps.iter()
        .map(|app| {
            format!(
                "{:>7}  {:>4.0}%  {:<5}  {}",
                app.pid,
                app.volume * 100.0,
                if app.muted { "muted" } else { "" },
                if app.name.is_empty() { "?" } else { app.name.as_str() },
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            eprintln!("mixctl: {}\n\n{}", message, USAGE);
            return ExitCode::from(2);
        }
    };
    debug!("parsed {:?}", options);

    let mut config = BackendConfig::from_env();
    if let Some(name) = options.client_name.clone() {
        config = config.with_client_name(name);
    }
    let controller = AudioController::with_config(config);

    let result = run(&controller, &options.command);
    controller.shutdown();

    match result {
        Ok(report) => {
            if options.json {
                println!("{}", report.json);
            } else {
                println!("{}", report.text);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if options.json {
                eprintln!("{}", json!({ "error": format!("{:?}", e.kind()), "message": e.to_string() }));
            } else {
                eprintln!("mixctl: {}", e);
            }
            ExitCode::from(1)
        }
    }
}
