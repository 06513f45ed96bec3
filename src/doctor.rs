use std::path::Path;

use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::player::PlayerSettings;

pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
        }
    }

    fn warning(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
        }
    }

    fn error(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
        }
    }

    pub fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "✓",
            CheckStatus::Warning => "⚠",
            CheckStatus::Error => "✗",
        }
    }

    pub fn color(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "\x1b[32m",      // green
            CheckStatus::Warning => "\x1b[33m", // yellow
            CheckStatus::Error => "\x1b[31m",   // red
        }
    }
}

pub async fn run_checks(config: &Config) -> Vec<CheckResult> {
    vec![
        check_config_file(),
        check_player(config),
        check_catalog(config).await,
        check_ipc_path(config),
    ]
}

fn check_config_file() -> CheckResult {
    match Config::config_path() {
        Ok(path) if path.exists() => CheckResult::ok("Config", &format!("{}", path.display())),
        Ok(path) => CheckResult::warning(
            "Config",
            &format!("No config at {}, using defaults", path.display()),
        ),
        Err(e) => CheckResult::warning("Config", &format!("{}, using defaults", e)),
    }
}

fn check_player(config: &Config) -> CheckResult {
    let player = &config.player.command;

    match which::which(player) {
        Ok(path) => CheckResult::ok("Player", &format!("{} found at {}", player, path.display())),
        Err(_) => CheckResult::error("Player", &format!("'{}' not found in PATH", player)),
    }
}

async fn check_catalog(config: &Config) -> CheckResult {
    let client = match CatalogClient::new(&config.catalog) {
        Ok(client) => client,
        Err(e) => return CheckResult::error("Catalog", &format!("Invalid settings: {}", e)),
    };

    match client.search_shows("test", config.player.translation).await {
        Ok(shows) => CheckResult::ok(
            "Catalog",
            &format!("Reachable, {} results for a test search", shows.len()),
        ),
        Err(e) if e.is_transport() => {
            CheckResult::error("Catalog", &format!("Unreachable: {}", e))
        }
        Err(e) => CheckResult::warning("Catalog", &format!("Reachable but query failed: {}", e)),
    }
}

fn check_ipc_path(config: &Config) -> CheckResult {
    let settings = PlayerSettings::from_config(&config.player);
    let path = settings.endpoint.path();

    if !settings.endpoint.has_artifact() {
        return CheckResult::ok("IPC", &format!("Named pipe {}", path.display()));
    }

    match path.parent() {
        Some(dir) if is_writable_dir(dir) => {
            CheckResult::ok("IPC", &format!("Socket {}", path.display()))
        }
        Some(dir) => CheckResult::error(
            "IPC",
            &format!("Socket directory {} is not writable", dir.display()),
        ),
        None => CheckResult::error("IPC", &format!("Invalid socket path {}", path.display())),
    }
}

fn is_writable_dir(dir: &Path) -> bool {
    let probe = dir.join(".hisame_doctor");
    match std::fs::write(&probe, "test") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

pub fn print_results(results: &[CheckResult]) {
    let reset = "\x1b[0m";

    println!("\nhisame doctor\n");

    for result in results {
        println!(
            "  {}{} {}{}  {}",
            result.color(),
            result.icon(),
            result.name,
            reset,
            result.message
        );
    }

    println!();

    let errors = results
        .iter()
        .filter(|r| r.status == CheckStatus::Error)
        .count();
    let warnings = results
        .iter()
        .filter(|r| r.status == CheckStatus::Warning)
        .count();

    if errors > 0 {
        println!("  {} error(s), {} warning(s)", errors, warnings);
        println!("  Fix errors above to use hisame.\n");
    } else if warnings > 0 {
        println!("  {} warning(s) - hisame should still work.\n", warnings);
    } else {
        println!("  All checks passed!\n");
    }
}

/// True when no check failed outright
pub fn all_passed(results: &[CheckResult]) -> bool {
    results.iter().all(|r| r.status != CheckStatus::Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_player_is_error() {
        let mut config = Config::default();
        config.player.command = "hisame-no-such-player".to_string();
        let result = check_player(&config);
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.icon(), "✗");
    }

    #[test]
    fn test_writable_temp_dir() {
        assert!(is_writable_dir(&std::env::temp_dir()));
    }

    #[test]
    fn test_all_passed_ignores_warnings() {
        let results = vec![CheckResult::ok("a", ""), CheckResult::warning("b", "")];
        assert!(all_passed(&results));
        let results = vec![CheckResult::error("c", "")];
        assert!(!all_passed(&results));
    }
}
