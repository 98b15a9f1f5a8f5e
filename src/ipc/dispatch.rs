//! Control requests applied to the running input context.

use anyhow::{Result, anyhow};
use serde_json::{Value, json};
use std::time::{Duration, Instant};

use crate::config::validate_grab_allowed;
use crate::context::InputContext;
use crate::datapipe::{DisplayState, HeldSensors, StatePipe};

pub type DaemonContext = InputContext<StatePipe, HeldSensors>;

fn flag(req: &Value, key: &str) -> Result<bool> {
    req.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| anyhow!("'{key}' must be true or false"))
}

fn number(req: &Value, key: &str) -> Result<u64> {
    req.get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("'{key}' must be a non-negative integer"))
}

/// Runs one request; `shutdown` is handled by the server loop.
pub fn dispatch(ctx: &mut DaemonContext, req: &Value, now: Instant) -> Result<Value> {
    let op = req.get("op").and_then(Value::as_str).unwrap_or("");
    match op {
        "status" => {
            let mut status = ctx.status();
            status["state"] = ctx.pipe().snapshot();
            status["sensors"] = json!(ctx.sensors().paths());
            status["socket"] = json!(super::runtime::socket_path());
            Ok(status)
        }
        "touch_grab" => {
            ctx.request_touch_grab(flag(req, "grab")?, now);
            Ok(ctx.touch().status())
        }
        "keypad_grab" => {
            ctx.request_keypad_grab(flag(req, "grab")?, now);
            Ok(ctx.keypad().status())
        }
        "display" => {
            let name = req.get("state").and_then(Value::as_str).unwrap_or("");
            let state =
                DisplayState::parse(name).ok_or_else(|| anyhow!("unknown display state '{name}'"))?;
            ctx.set_display_state(state, now);
            Ok(json!({ "display": state }))
        }
        "set" => {
            let key = req.get("key").and_then(Value::as_str).unwrap_or("");
            match key {
                "input_grab_allowed" => {
                    let mask = u8::try_from(number(req, "value")?)
                        .map_err(|_| anyhow!("input_grab_allowed out of range"))?;
                    validate_grab_allowed(mask)?;
                    ctx.set_grab_allowed(mask, now);
                }
                "touch_unblock_delay_ms" => {
                    ctx.set_touch_unblock_delay(Duration::from_millis(number(req, "value")?));
                }
                "doubletap_emulation" => ctx.set_doubletap_emulation(flag(req, "value")?),
                other => return Err(anyhow!("unknown setting '{other}'")),
            }
            Ok(ctx.status()["settings"].clone())
        }
        other => Err(anyhow!("unknown op: {other}")),
    }
}

pub fn respond(result: Result<Value>) -> Value {
    match result {
        Ok(data) => json!({"ok": true, "data": data}),
        Err(e) => json!({"ok": false, "error": e.to_string()}),
    }
}
