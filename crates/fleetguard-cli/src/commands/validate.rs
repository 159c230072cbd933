//! `fleetguard validate` — parse and validate a controller configuration
//! file without starting anything.

use std::path::Path;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("Error reading {}: {err}", path.display());
            std::process::exit(1);
        }
    };

    match fleetguard_config::parse_controller_config(&text) {
        Ok(config) => {
            println!("Configuration valid: {}", path.display());
            println!("  max_concurrent_plans:         {}", config.max_concurrent_plans);
            println!("  per_decision_timeout_seconds: {}", config.per_decision_timeout_seconds);
            println!("  policy_default_mode:          {:?}", config.policy_default_mode);
            println!(
                "  canary_default:               initial={}% increment={}% min_health_score={}",
                config.canary_default.initial_percent,
                config.canary_default.increment_percent,
                config.canary_default.min_health_score
            );
            println!(
                "  rollback_default:             min_health_score={} consecutive_bad_threshold={}",
                config.rollback_default.min_health_score, config.rollback_default.consecutive_bad_threshold
            );
            println!("  price_table.gpu_hour entries: {}", config.price_table.gpu_hour.len());
            Ok(())
        }
        Err(err) => {
            eprintln!("Configuration invalid: {err}");
            std::process::exit(1);
        }
    }
}
