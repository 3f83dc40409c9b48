//! Command-line entry points (spec §9 "Startup sequence" + ops surface).

use clap::{Parser, Subcommand};

/// gwy-gateway — a multimodal generation gateway.
#[derive(Debug, Parser)]
#[command(name = "gwy-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

pub mod config {
    use gwy_domain::config::{Config, ConfigSeverity};

    /// Parse and validate the config, printing any issues.
    /// Returns `true` when no errors (warnings are non-fatal).
    pub fn validate(config: &Config, config_path: &str) -> bool {
        let issues = config.validate();

        if issues.is_empty() {
            println!("Config OK ({config_path})");
            return true;
        }

        let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();
        let warning_count = issues.len() - error_count;

        for issue in &issues {
            println!("{issue}");
        }

        println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

        error_count == 0
    }

    /// Dump the resolved config (with all defaults filled in) as TOML.
    pub fn show(config: &Config) {
        match toml::to_string_pretty(config) {
            Ok(output) => print!("{output}"),
            Err(e) => {
                eprintln!("Failed to serialize config: {e}");
                std::process::exit(1);
            }
        }
    }
}

pub mod doctor {
    use gwy_domain::config::{Config, ConfigSeverity};

    /// Run all diagnostic checks and print a summary.
    pub fn run(config: &Config, config_path: &str) -> bool {
        println!("gwy-gateway doctor");
        println!("==================\n");

        let mut all_passed = true;

        check_config_file(config_path, &mut all_passed);
        check_config_validation(config, &mut all_passed);
        check_llm_providers(config, &mut all_passed);
        check_storage_root(config, &mut all_passed);

        println!();
        if all_passed {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. Review the output above.");
        }

        all_passed
    }

    fn check_config_file(config_path: &str, all_passed: &mut bool) {
        let exists = std::path::Path::new(config_path).exists();
        print_check(
            "Config file exists",
            exists,
            if exists { config_path.to_owned() } else { format!("{config_path} not found (using defaults)") },
        );
        if !exists {
            *all_passed = false;
        }
    }

    fn check_config_validation(config: &Config, all_passed: &mut bool) {
        let issues = config.validate();
        let error_count = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).count();

        if issues.is_empty() {
            print_check("Config validation", true, "no issues".into());
        } else {
            print_check("Config validation", error_count == 0, format!("{} issue(s) ({error_count} error(s))", issues.len()));
            for issue in &issues {
                println!("      {issue}");
            }
            if error_count > 0 {
                *all_passed = false;
            }
        }
    }

    fn check_llm_providers(config: &Config, all_passed: &mut bool) {
        let count = config.llm.providers.len();
        let ok = count > 0;
        print_check("LLM providers configured", ok, if ok { format!("{count} provider(s)") } else { "none configured".into() });
        if !ok {
            *all_passed = false;
        }
    }

    fn check_storage_root(config: &Config, all_passed: &mut bool) {
        let path = std::path::Path::new(&config.storage.model_root);
        let exists = path.exists();
        let writable = if exists {
            let probe = path.join(".gwy_doctor_probe");
            let w = std::fs::write(&probe, b"probe").is_ok();
            let _ = std::fs::remove_file(&probe);
            w
        } else {
            std::fs::create_dir_all(path).is_ok()
        };

        let ok = writable;
        let detail = if writable { format!("{} (writable)", path.display()) } else { format!("{} (not writable)", path.display()) };
        print_check("Storage root", ok, detail);
        if !ok {
            *all_passed = false;
        }
    }

    fn print_check(name: &str, passed: bool, detail: String) {
        let status = if passed { "PASS" } else { "FAIL" };
        println!("  [{status}] {name}: {detail}");
    }
}
