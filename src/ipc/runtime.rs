use directories::UserDirs;
use std::{env, fs, path::PathBuf};

pub fn runtime_dir() -> PathBuf {
    let dir = match env::var_os("XDG_RUNTIME_DIR") {
        Some(d) => PathBuf::from(d),
        // ~/.local/run
        None => match UserDirs::new() {
            Some(u) => u.home_dir().join(".local").join("run"),
            None => env::temp_dir(),
        },
    };
    let _ = fs::create_dir_all(&dir);
    dir
}

pub fn socket_path() -> PathBuf {
    runtime_dir().join("evind.sock")
}
