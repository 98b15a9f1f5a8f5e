use anyhow::{Context, Result, anyhow};
use pico_args::Arguments;
use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

use crate::caps::DeviceCapabilities;
use crate::classify;
use crate::codes::{code_name, type_name};
use crate::config::{self, Config};
use crate::devices::{DeviceRules, EvdevDevice, EvdevNode};
use crate::ipc;
use crate::watcher;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();
    let config_path: Option<PathBuf> = pargs.opt_value_from_str("--config")?;

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon(config_path.as_deref());
    }

    if env::args().len() == 1 || pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("run") => ipc::run_daemon(config_path.as_deref()),

        Some("start") => {
            let exe = env::current_exe()?;
            let mut cmd = Command::new(exe);
            cmd.arg("--daemon");
            if let Some(p) = &config_path {
                cmd.arg("--config").arg(p);
            }
            let child = cmd.spawn()?;
            println!("evind: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(serde_json::json!({"op": "shutdown"})),

        Some("status") => request(serde_json::json!({"op": "status"})),

        Some("grab") => {
            let usage = || anyhow!("usage: evind grab <touch|keypad> <on|off>");
            let what: String = pargs.free_from_str().map_err(|_| usage())?;
            let state: String = pargs.free_from_str().map_err(|_| usage())?;
            let grab = parse_on_off(&state).ok_or_else(usage)?;
            let op = match what.as_str() {
                "touch" => "touch_grab",
                "keypad" => "keypad_grab",
                _ => return Err(usage()),
            };
            request(serde_json::json!({"op": op, "grab": grab}))
        }

        Some("display") => {
            let state: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: evind display <off|lpm_off|lpm_on|dim|on|power_up|power_down>"))?;
            request(serde_json::json!({"op": "display", "state": state}))
        }

        Some("set") => {
            let usage = || anyhow!("usage: evind set <key> <value>");
            let key: String = pargs.free_from_str().map_err(|_| usage())?;
            let value: String = pargs.free_from_str().map_err(|_| usage())?;
            let value = parse_value(&value);
            request(serde_json::json!({"op": "set", "key": key, "value": value}))
        }

        Some("probe") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: evind probe <device path>"))?;
            let cfg = Config::load(config_path.as_deref())?;
            print_response(&probe_report(&path, &cfg.device_rules())?);
            Ok(())
        }

        Some("list") => {
            let cfg = Config::load(config_path.as_deref())?;
            let rules = cfg.device_rules();
            let mut out = Vec::new();
            for path in watcher::scan(&cfg.paths.input_dir)? {
                match probe_report(&path, &rules) {
                    Ok(mut v) => {
                        if let Some(obj) = v.as_object_mut() {
                            obj.remove("capabilities");
                        }
                        out.push(v);
                    }
                    Err(e) => out.push(serde_json::json!({"path": path, "error": format!("{e:#}")})),
                }
            }
            print_response(&serde_json::Value::Array(out));
            Ok(())
        }

        Some("doctor") => {
            let cfg = Config::load(config_path.as_deref())?;
            print_response(&config::doctor_report(&cfg, config_path.as_deref()));
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

fn parse_on_off(s: &str) -> Option<bool> {
    match s {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

// numbers and booleans as JSON, anything else as a string
fn parse_value(s: &str) -> serde_json::Value {
    serde_json::from_str(s).unwrap_or_else(|_| serde_json::Value::String(s.to_string()))
}

/// Opens a device locally and reports how the daemon would classify it.
fn probe_report(path: &Path, rules: &DeviceRules) -> Result<serde_json::Value> {
    let dev = EvdevDevice::open(path).with_context(|| format!("can't open {}", path.display()))?;
    let caps = DeviceCapabilities::probe(&dev)?;
    let (bus, vendor, product) = dev.input_id();
    let probed = classify::classify(&caps);
    let kind = rules.resolve_kind(dev.input_id(), dev.name(), probed);
    let mut capabilities = serde_json::Map::new();
    for (ev_type, codes) in caps.summary() {
        let names: Vec<String> = codes.iter().map(|&c| code_name(ev_type, c)).collect();
        capabilities.insert(type_name(ev_type), serde_json::json!(names));
    }
    Ok(serde_json::json!({
        "path": path,
        "name": dev.name(),
        "id": classify::id_key(bus, vendor, product),
        "config_key": classify::sanitize_key(dev.name()),
        "probed": probed,
        "kind": kind,
        "blacklisted": rules.is_blacklisted(dev.name()),
        "capabilities": capabilities,
    }))
}

fn print_help() {
    println!(
        r#"evind: evdev input daemon

USAGE:
  evind [--config <file>] <command>

COMMANDS:
  help [command]                       Show general or command-specific help
  run                                  Run the daemon in the foreground
  start                                Start the daemon in the background
  stop                                 Stop the daemon
  status                               Show devices, grab state and published state
  grab <touch|keypad> <on|off>         Request or drop an input grab
  display <state>                      Feed a display state to the touch grab
  set <key> <value>                    Change a runtime setting
  probe <path>                         Classify one device without the daemon
  list                                 Classify every device in the input directory
  doctor                               Diagnose permissions and configuration

TIPS:
  - Config: ~/.config/evind/evind.toml
  - Log level: RUST_LOG=debug
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "run" => println!("usage: evind run\nRuns the daemon in the foreground until SIGINT/SIGTERM."),
        "start" => println!("usage: evind start\nStarts the background daemon."),
        "stop" => println!("usage: evind stop\nStops the running daemon."),
        "status" => println!(
            "usage: evind status\nShows monitored devices, grab controllers, settings and published state."
        ),
        "grab" => println!(
            "usage: evind grab <touch|keypad> <on|off>\nThe grab is applied once no finger or key is held."
        ),
        "display" => println!(
            "usage: evind display <off|lpm_off|lpm_on|dim|on|power_up|power_down>"
        ),
        "set" => println!(
            "usage: evind set <key> <value>\nKeys: input_grab_allowed (0-3), touch_unblock_delay_ms, doubletap_emulation (true|false)"
        ),
        "probe" => println!("usage: evind probe <path>\nPrints capabilities and the probed device type."),
        "list" => println!("usage: evind list\nProbes every event node in the input directory."),
        "doctor" => println!("usage: evind doctor\nChecks permissions and lists readable devices."),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
