use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable the package manager exports with its own verbosity.
pub const VERBOSITY_ENV: &str = "MUNKI_VERBOSITY_LEVEL";

/// Filter directive for the given debug flag and ambient verbosity level.
pub fn filter_directive(debug: bool, verbosity: Option<&str>) -> String {
    let level = if debug {
        "trace"
    } else {
        match verbosity.and_then(|v| v.trim().parse::<u8>().ok()).unwrap_or(0) {
            0 => "info",
            1 | 2 => "debug",
            _ => "trace",
        }
    };
    format!("checkin_client={level},checkin_submit={level},checkin_module={level}")
}

/// Initialize tracing with output to stderr. `RUST_LOG` overrides everything.
pub fn init_tracing(debug: bool) {
    let filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(
        |_| filter_directive(debug, std::env::var(VERBOSITY_ENV).ok().as_deref()),
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins_over_verbosity() {
        assert!(filter_directive(true, Some("0")).starts_with("checkin_client=trace"));
    }

    #[test]
    fn verbosity_levels_map_to_filters() {
        assert!(filter_directive(false, None).starts_with("checkin_client=info"));
        assert!(filter_directive(false, Some("2")).starts_with("checkin_client=debug"));
        assert!(filter_directive(false, Some("5")).starts_with("checkin_client=trace"));
        assert!(filter_directive(false, Some("loud")).starts_with("checkin_client=info"));
    }
}
