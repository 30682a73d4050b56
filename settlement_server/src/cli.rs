use std::{env, env::VarError};

/// There's no real CLI for the server, so just do quick 'n dirty
pub fn handle_command_line_args() -> bool {
    let has_cli_args = env::args().count() > 1;
    if has_cli_args {
        // We don't expect any CLI args, so always print the help
        display_readme();
        display_envs();
    }
    has_cli_args
}

fn display_readme() {
    const README: &str = include_str!("./cli-help.txt");
    println!("\n{README}\n");
}

fn display_envs() {
    // Be explicit about which envars to print, so as to avoid accidentally exposing secrets
    const DISPLAY_ENVS: [&str; 19] = [
        "RUST_LOG",
        "SETTLE_HOST",
        "SETTLE_PORT",
        "SETTLE_DATABASE_URL",
        "SETTLE_CURRENCY",
        "SETTLE_HOLD_PERIOD_DAYS",
        "SETTLE_SWEEP_INTERVAL_SECS",
        "SETTLE_SWEEP_BATCH_SIZE",
        "SETTLE_TAX_SHIPPING",
        "SETTLE_REMAINDER_POLICY",
        "SETTLE_MISMATCH_TOLERANCE_CENTS",
        "SETTLE_DEFAULT_COMMISSION_RATE",
        "SETTLE_WEBHOOK_HMAC_CHECKS",
        "SETTLE_WEBHOOK_IP_WHITELIST",
        "SETTLE_USE_X_FORWARDED_FOR",
        "SETTLE_USE_FORWARDED",
        "SETTLE_GATEWAY_URL",
        "SETTLE_GATEWAY_TIMEOUT_SECS",
        "SETTLE_GATEWAY_MAX_ATTEMPTS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
