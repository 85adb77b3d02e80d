//! `teeproxy validate`: check a configuration file for errors.
//!
//! Parses and validates the config file, reporting results in either
//! human-readable text or machine-readable JSON format.

use crate::cli::{ValidateArgs, ValidateFormat};
use crate::config::{parse_config_str, sha256_hex, validation};
use crate::error::TeeError;

pub fn execute(args: &ValidateArgs) -> Result<(), TeeError> {
    let path = &args.config;

    if !path.exists() {
        return Err(TeeError::ConfigFileNotFound { path: path.clone() });
    }

    let content = std::fs::read_to_string(path)?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &content, &path.display().to_string())?;

    if let Err(errors) = validation::validate(&config) {
        match args.format {
            ValidateFormat::Text => {
                eprintln!("\u{2717} {} has {} errors\n", path.display(), errors.len());
                for error in &errors {
                    eprintln!("{error}");
                }
            }
            ValidateFormat::Json => {
                let json_errors: Vec<serde_json::Value> = errors
                    .iter()
                    .map(|e| {
                        serde_json::json!({
                            "field": e.field,
                            "message": e.message,
                            "suggestion": e.suggestion,
                        })
                    })
                    .collect();
                println!(
                    "{}",
                    serde_json::json!({
                        "valid": false,
                        "errors": json_errors,
                    })
                );
            }
        }
        return Err(TeeError::ConfigValidation { errors });
    }

    if validation::percent_out_of_range(config.percent) {
        eprintln!(
            "warning: percent {} is outside 0-100 and will mirror {}",
            config.percent,
            if config.percent > 100.0 { "every request" } else { "nothing" }
        );
    }

    match args.format {
        ValidateFormat::Text => {
            println!(
                "\u{2713} {}",
                validation::format_validation_report(&path.display().to_string(), &config)
            );
        }
        ValidateFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "version": sha256_hex(content.as_bytes()),
                    "listen": config.listen_addr(),
                    "primary": config.primary.address,
                    "shadow": config.shadow.address,
                    "percent": config.percent,
                })
            );
        }
    }

    Ok(())
}
