use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Crates whose logs follow `level`. Everything else (sqlx, hyper, reqwest)
/// stays at `warn` unless `RUST_LOG` says otherwise.
const CERTLOOKUP_TARGETS: [&str; 3] = ["certlookup", "certlookup_backend", "tower_http"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: &str) -> String {
    let mut directives = vec!["warn".to_string()];
    directives.extend(
        CERTLOOKUP_TARGETS
            .iter()
            .map(|target| format!("{target}={level}")),
    );
    directives.join(",")
}

/// Installs the global subscriber. `RUST_LOG` overrides `level`.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init_logging(level: &str) -> Result<()> {
    let filter_layer = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(level))
            .with_context(|| format!("invalid log level '{level}'"))?,
    };

    let fmt_layer = fmt::layer()
        .compact()
        .with_ansi(false)
        .with_target(false)
        .with_writer(std::io::stderr)
        .boxed();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()
        .context("failed to initialize certlookup logging")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_level_to_certlookup_targets() {
        assert_eq!(
            default_directives("debug"),
            "warn,certlookup=debug,certlookup_backend=debug,tower_http=debug"
        );
        assert!(EnvFilter::try_new(default_directives("info")).is_ok());
    }
}
