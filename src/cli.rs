use std::{path::PathBuf, sync::OnceLock};

use clap::Parser;

/// Tails the JSON logs of Docker containers and forwards errors to Sentry
/// and Google Cloud Logging.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Docker's container directory, typically /var/lib/docker/containers.
    pub dir: PathBuf,

    /// Path to the config file.
    #[arg(short, long, default_value = "logwatch.toml")]
    pub config: PathBuf,

    /// Verbose logging, and skip reading the release file.
    #[arg(long, env = "LOGWATCH_DEV")]
    pub dev: bool,

    /// Sentry DSN, or a path to a file containing it.
    #[arg(long, env = "LOGWATCH_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    /// Google Cloud project to write log entries to.
    #[arg(long, env = "LOGWATCH_GCP_PROJECT_ID")]
    pub gcp_project_id: Option<String>,

    /// File holding the release identifier of this build.
    #[arg(long, default_value = "/commit.sha")]
    pub release_file: PathBuf,
}

static ARGS: OnceLock<Args> = OnceLock::new();

pub fn get_cli_args() -> &'static Args {
    ARGS.get_or_init(Args::parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_dir_and_defaults() {
        let args = Args::try_parse_from(["logwatch", "/var/lib/docker/containers"])
            .expect("Failed to parse args");
        assert_eq!(args.dir, PathBuf::from("/var/lib/docker/containers"));
        assert_eq!(args.config, PathBuf::from("logwatch.toml"));
        assert_eq!(args.release_file, PathBuf::from("/commit.sha"));
    }

    #[test]
    fn test_dir_is_required() {
        assert!(Args::try_parse_from(["logwatch"]).is_err());
    }

    #[test]
    fn test_sink_flags() {
        let args = Args::try_parse_from([
            "logwatch",
            "--sentry-dsn",
            "https://key@sentry.example.com/1",
            "--gcp-project-id",
            "my-project",
            "/containers",
        ])
        .expect("Failed to parse args");
        assert_eq!(args.sentry_dsn.as_deref(), Some("https://key@sentry.example.com/1"));
        assert_eq!(args.gcp_project_id.as_deref(), Some("my-project"));
    }
}
