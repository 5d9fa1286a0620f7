use std::time::Duration;

use sage_domain::config::{Config, ConfigSeverity};
use sage_kernel_proxy::{KernelGateway, RedisRegistryStore, RegistryStore, RestKernelGateway};

/// Run all diagnostic checks and print a summary.
///
/// Returns `Ok(true)` when every check passes.
pub async fn run(config: &Config, config_path: &str) -> anyhow::Result<bool> {
    println!("sage-kernel doctor");
    println!("==================\n");

    let mut all_passed = true;

    check_config_file(config_path);
    check_config_validation(config, &mut all_passed);
    check_web_server(config);
    let stored_token = check_redis(config, &mut all_passed).await;
    check_gateway(config, stored_token, &mut all_passed).await;

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }

    Ok(all_passed)
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &str) {
    let exists = std::path::Path::new(config_path).exists();
    // Running on defaults plus environment is a normal deployment.
    print_check(
        "Config file",
        true,
        if exists {
            config_path.to_owned()
        } else {
            format!("{config_path} not found (defaults + environment)")
        },
    );
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
        return;
    }
    print_check(
        "Config validation",
        error_count == 0,
        format!("{} issue(s) ({error_count} error(s))", issues.len()),
    );
    for issue in &issues {
        println!("      {issue}");
    }
    if error_count > 0 {
        *all_passed = false;
    }
}

/// Where SAGE3 widgets reach the web server. Reported, not probed.
fn check_web_server(config: &Config) {
    let token = if config.sage3.token.is_some() {
        "TOKEN set"
    } else {
        "TOKEN not set"
    };
    print_check(
        "Web server",
        true,
        format!("{} ({token})", config.web_server_url()),
    );
}

/// Returns the gateway token stored in Redis, if any.
async fn check_redis(config: &Config, all_passed: &mut bool) -> Option<String> {
    let url = config.redis_url();
    let store = match RedisRegistryStore::connect(&url, &config.redis).await {
        Ok(store) => store,
        Err(e) => {
            print_check("Redis reachable", false, format!("{url} ({e})"));
            *all_passed = false;
            return None;
        }
    };
    if let Err(e) = store.ping().await {
        print_check("Redis reachable", false, format!("{url} ({e})"));
        *all_passed = false;
        return None;
    }
    print_check("Redis reachable", true, url);

    match store.load_all().await {
        Ok(records) => print_check(
            "Kernel registry",
            true,
            format!("{} record(s) in {}", records.len(), config.redis.registry_key),
        ),
        Err(e) => {
            print_check("Kernel registry", false, e.to_string());
            *all_passed = false;
        }
    }

    store.gateway_token().await.ok().flatten()
}

async fn check_gateway(config: &Config, stored_token: Option<String>, all_passed: &mut bool) {
    let url = config.jupyter_url();
    let token = config.jupyter.token.clone().or(stored_token);
    let has_token = token.is_some();

    let gateway = match RestKernelGateway::new(&url, token, Duration::from_secs(5)) {
        Ok(gw) => gw,
        Err(e) => {
            print_check("Kernel gateway reachable", false, e.to_string());
            *all_passed = false;
            return;
        }
    };

    match gateway.list_kernels().await {
        Ok(kernels) => print_check(
            "Kernel gateway reachable",
            true,
            format!("{url} ({} live kernel(s))", kernels.len()),
        ),
        Err(e) => {
            let hint = if has_token { "" } else { ", no token" };
            print_check("Kernel gateway reachable", false, format!("{url} ({e}{hint})"));
            *all_passed = false;
        }
    }
}

// ── Formatting helper ─────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    println!("  [{status}] {name}: {detail}");
}
