//! Configuration validation with detailed error reporting.
//!
//! The [`validate`] function checks a resolved [`Config`] for structural
//! errors such as malformed `host:port` addresses, zero timeouts, a NaN
//! mirror percentage, or half-configured TLS. Returns every
//! [`ValidationError`] found, with suggestions where one is obvious.

use super::model::{Backend, Config};
use crate::error::ValidationError;

/// Validate a `host:port` address. An empty host is allowed (`:8888`).
pub fn validate_address(addr: &str) -> Result<(), String> {
    if addr.is_empty() {
        return Err("address cannot be empty".into());
    }
    let Some((host, port)) = addr.rsplit_once(':') else {
        return Err(format!("'{addr}' is missing a port"));
    };
    if host.contains(char::is_whitespace) {
        return Err(format!("'{addr}' contains whitespace"));
    }
    match port.parse::<u16>() {
        Ok(_) => Ok(()),
        Err(_) => Err(format!("'{port}' is not a valid port")),
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, addr: &str) {
    if let Err(message) = validate_address(addr) {
        let suggestion = (!addr.is_empty() && !addr.contains(':'))
            .then(|| format!("did you mean '{addr}:80'?"));
        errors.push(ValidationError {
            field: field.into(),
            message,
            suggestion,
        });
    }
}

fn check_backend(errors: &mut Vec<ValidationError>, name: &str, backend: &Backend) {
    check_address(errors, &format!("{name}.address"), &backend.address);

    if backend.timeout == 0 {
        errors.push(ValidationError {
            field: format!("{name}.timeout"),
            message: "connect timeout must be at least 1 second".into(),
            suggestion: None,
        });
    }

    if backend.exchange_timeout == Some(0) {
        errors.push(ValidationError {
            field: format!("{name}.exchange_timeout"),
            message: "exchange timeout must be at least 1 second".into(),
            suggestion: Some("omit it to leave the exchange unbounded".into()),
        });
    }
}

pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listen", &config.listen);
    if let Some(ref admin) = config.admin_listen {
        check_address(&mut errors, "admin_listen", admin);
        if config.listen_addr() == config.admin_addr().unwrap_or_default() {
            errors.push(ValidationError {
                field: "admin_listen".into(),
                message: "admin listener cannot share the proxy address".into(),
                suggestion: None,
            });
        }
    }

    check_backend(&mut errors, "primary", &config.primary);
    check_backend(&mut errors, "shadow", &config.shadow);

    if config.percent.is_nan() {
        errors.push(ValidationError {
            field: "percent".into(),
            message: "percent must be a number between 0 and 100".into(),
            suggestion: None,
        });
    }

    if let Some(ref tls) = config.tls {
        match (&tls.cert, &tls.key) {
            (Some(_), None) => errors.push(ValidationError {
                field: "tls.key".into(),
                message: "key is required when cert is set".into(),
                suggestion: None,
            }),
            (None, Some(_)) => errors.push(ValidationError {
                field: "tls.cert".into(),
                message: "cert is required when key is set".into(),
                suggestion: None,
            }),
            _ => {}
        }
    }

    check_address(&mut errors, "metrics.address", &config.metrics.address);

    if config.max_body == 0 {
        errors.push(ValidationError {
            field: "max_body".into(),
            message: "max_body must be greater than zero".into(),
            suggestion: None,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// True when the percentage is a number outside `[0, 100]`. Such values are
/// accepted; the sampler treats them as never / always.
#[must_use]
pub fn percent_out_of_range(percent: f64) -> bool {
    !percent.is_nan() && !(0.0..=100.0).contains(&percent)
}

#[must_use]
pub fn format_validation_report(path: &str, config: &Config) -> String {
    let backend_line = |name: &str, b: &Backend| {
        let exchange = b
            .exchange_timeout
            .map_or_else(|| "unbounded".to_string(), |t| format!("{t}s"));
        format!(
            "  {name}: {} (connect {}s, exchange {exchange}, host rewrite {})",
            b.address,
            b.timeout,
            if b.host_rewrite { "on" } else { "off" }
        )
    };

    let tls = if config.tls.as_ref().and_then(|t| t.pair()).is_some() {
        "tls"
    } else {
        "plaintext"
    };

    let lines = [
        format!("  listen: {} ({tls})", config.listen_addr()),
        backend_line("primary", &config.primary),
        backend_line("shadow", &config.shadow),
        format!("  mirror: {}% of requests", config.percent),
    ];

    format!("{path} is valid\n{}", lines.join("\n"))
}
