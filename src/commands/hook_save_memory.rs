use chrono::Local;
use std::io;
use std::panic;

use crate::memory::hook::{STDIN_TIMEOUT, read_input_with_timeout, save_turn};
use crate::memory::paths::resolve_paths;
use crate::memory::registry::load_registry;

/// Hook entry point. Prints nothing and never fails: a broken capture must
/// not disturb the editor session that triggered it.
pub fn run() {
    panic::set_hook(Box::new(|_| {}));
    let _ = panic::catch_unwind(|| {
        let raw = read_input_with_timeout(io::stdin(), STDIN_TIMEOUT);
        let Ok(paths) = resolve_paths() else {
            return;
        };
        let registry = load_registry(&paths.registry_file);
        let _ = save_turn(&raw, &paths, &registry, Local::now());
    });
}
