mod caps;
mod classify;
mod cli;
mod codes;
mod config;
mod context;
mod datapipe;
mod devices;
mod doubletap;
mod event;
mod grab;
mod handlers;
mod ipc;
mod logging;
mod mapping;
mod timer;
mod watcher;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
