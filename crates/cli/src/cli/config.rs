use sage_domain::config::{Config, ConfigSeverity};

/// Print every validation issue. Returns `false` when any is an error.
pub fn validate(config: &Config, config_path: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}

/// Dump the resolved config (defaults and environment applied) as TOML.
/// Tokens are masked.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let mut masked = config.clone();
    mask(&mut masked.sage3.token);
    mask(&mut masked.jupyter.token);
    print!("{}", toml::to_string_pretty(&masked)?);
    Ok(())
}

fn mask(token: &mut Option<String>) {
    if let Some(t) = token.as_mut() {
        let keep: String = t.chars().take(4).collect();
        *t = format!("{keep}****");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_keeps_a_short_prefix() {
        let mut token = Some("abcdef123456".to_string());
        mask(&mut token);
        assert_eq!(token.as_deref(), Some("abcd****"));

        let mut none: Option<String> = None;
        mask(&mut none);
        assert!(none.is_none());
    }

    #[test]
    fn defaults_validate_without_errors() {
        assert!(validate(&Config::default(), "config.toml"));
    }
}
