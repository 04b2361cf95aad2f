pub mod agent;
pub mod briefing;
pub mod config;
pub mod daemon_lock;
pub mod hook;
pub mod paths;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod state;
pub mod supervisor;
pub mod telegram;
pub mod transcript;
pub mod util;
pub mod warn;
