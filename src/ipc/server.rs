use anyhow::{Result, anyhow};
use log::{debug, error, info};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::{
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::Path,
    sync::mpsc::{self, Receiver, Sender},
    thread,
    time::{Duration, Instant},
};

use super::dispatch::{dispatch, respond};
use super::pipeline::Pipeline;
use super::runtime::socket_path;
use crate::config::Config;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

enum IpcMsg {
    Request(serde_json::Value, Sender<serde_json::Value>),
    Shutdown,
}

pub fn run_daemon(config_path: Option<&Path>) -> Result<()> {
    let cfg = Config::load(config_path)?;

    // socket
    let sock = socket_path();
    if sock.exists() {
        let _ = std::fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    listener.set_nonblocking(true)?;
    info!("daemon: listening on {}", sock.display());

    let mut pipeline = Pipeline::new(&cfg)?;

    let (tx_req, rx_req) = mpsc::channel::<IpcMsg>();
    forward_signals(tx_req.clone())?;

    let result = serve(&listener, &mut pipeline, &tx_req, &rx_req);

    pipeline.shutdown();
    let _ = std::fs::remove_file(&sock);
    result
}

fn serve(
    listener: &UnixListener,
    pipeline: &mut Pipeline,
    tx_req: &Sender<IpcMsg>,
    rx_req: &Receiver<IpcMsg>,
) -> Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let tx = tx_req.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, tx) {
                        error!("ipc client error: {e}");
                    }
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => error!("accept failed: {e}"),
        }

        let now = Instant::now();
        pipeline.tick(now);

        while let Ok(msg) = rx_req.try_recv() {
            match msg {
                IpcMsg::Request(req, reply) => {
                    debug!("request {req}");
                    let resp = respond(dispatch(pipeline.ctx_mut(), &req, Instant::now()));
                    let _ = reply.send(resp);
                }
                IpcMsg::Shutdown => {
                    info!("daemon: shutting down");
                    return Ok(());
                }
            }
        }

        thread::sleep(pipeline.idle_for(Instant::now()));
    }
}

fn forward_signals(tx: Sender<IpcMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("daemon: signal {sig}");
            let _ = tx.send(IpcMsg::Shutdown);
        }
    });
    Ok(())
}

fn handle_client(mut stream: UnixStream, tx_req: Sender<IpcMsg>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: serde_json::Value = serde_json::from_str(&line)?;
    let op = req.get("op").and_then(|v| v.as_str()).unwrap_or("");

    let resp = if op == "shutdown" {
        let _ = tx_req.send(IpcMsg::Shutdown);
        serde_json::json!({"ok": true, "data": "shutting down"})
    } else {
        let (tx, rx) = mpsc::channel();
        tx_req
            .send(IpcMsg::Request(req, tx))
            .map_err(|_| anyhow!("daemon loop is gone"))?;
        rx.recv_timeout(REPLY_TIMEOUT)
            .map_err(|_| anyhow!("no reply from daemon loop"))?
    };

    writeln!(stream, "{resp}")?;
    Ok(())
}

// client helper
pub fn client_request(req: serde_json::Value) -> Result<serde_json::Value> {
    let sock = socket_path();
    if !sock.exists() {
        return Err(anyhow!(
            "evind daemon is not running (socket missing at {})",
            sock.display()
        ));
    }
    let mut stream = UnixStream::connect(sock)?;
    let line = serde_json::to_string(&req)? + "\n";
    stream.write_all(line.as_bytes())?;
    let mut reader = BufReader::new(stream);
    let mut resp = String::new();
    reader.read_line(&mut resp)?;
    let v: serde_json::Value = serde_json::from_str(&resp)?;
    Ok(v)
}
