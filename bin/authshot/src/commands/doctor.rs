use authshot_core::{Config, Paths};
use authshot_tools::browser::session::find_system_browser;

/// Environment diagnostics: config, cookie storage, browser discovery.
pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("authshot doctor");
    println!("================");
    println!();

    println!("Configuration");
    if paths.config_file().exists() {
        match Config::load_or_default(&paths) {
            Ok(config) => {
                print_ok("Config file loaded", &paths.config_file().display().to_string());
                if let Some(path) = &config.browser.path_override {
                    println!("  Browser override: {}", path);
                }
            }
            Err(e) => print_err("Config file unreadable", &e.to_string()),
        }
    } else {
        print_ok("No config file (defaults in effect)", &paths.config_file().display().to_string());
    }
    println!();

    println!("Cookie storage");
    let cookies_dir = paths.cookies_dir();
    if cookies_dir.exists() {
        let count = std::fs::read_dir(&cookies_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        print_ok(
            &format!("{} stored cookie record(s)", count),
            &cookies_dir.display().to_string(),
        );
    } else {
        print_ok("No cookies stored yet", &cookies_dir.display().to_string());
    }
    println!();

    println!("Browser");
    match find_system_browser() {
        Some(path) => print_ok("System browser discovered", &path),
        None => print_err(
            "No Chromium-family browser found",
            "install one or set browser.pathOverride in config.json",
        ),
    }
    println!();

    println!("Login signal");
    let signal = paths.login_signal_file();
    if signal.exists() {
        print_err(
            "Stale login signal file present",
            &format!("remove {} if no login-and-wait call is pending", signal.display()),
        );
    } else {
        print_ok("No pending signal file", &signal.display().to_string());
    }
    println!();

    Ok(())
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  [ok] {}", label);
    } else {
        println!("  [ok] {} : {}", label, detail);
    }
}

fn print_err(label: &str, detail: &str) {
    println!("  [!!] {} : {}", label, detail);
}
