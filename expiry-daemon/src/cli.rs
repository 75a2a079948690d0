use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use expiry_core::ExpirationPreset;

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "expiryd")]
#[command(about = "Track expiration dates for files in watched folders")]
#[command(version)]
pub struct Cli {
    /// Config file (TOML or JSON). Falls back to EXPIRY_CONFIG_JSON and the
    /// default locations when unset.
    #[arg(long, global = true, env = "EXPIRY_CONFIG_PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Watch folders and report expirations until interrupted (default)
    Run,
    /// Set the expiration of a file
    Set {
        file: PathBuf,
        #[command(flatten)]
        when: When,
    },
    /// Remove the expiration of a file
    Clear { file: PathBuf },
    /// Print the expiration of a file
    Show { file: PathBuf },
    /// List the files of a folder with their expirations
    Files { folder: PathBuf },
    /// Sweep now and list the soonest-expiring files per folder
    Expiring {
        /// Only this folder
        #[arg(long)]
        folder: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Manage the watch list
    Folders {
        #[command(subcommand)]
        action: FolderAction,
    },
    /// Print the effective configuration as JSON
    Config,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum FolderAction {
    List,
    Add { path: PathBuf },
    Remove { path: PathBuf },
}

#[derive(Args, Debug, PartialEq, Eq)]
#[group(required = true, multiple = false)]
pub struct When {
    /// Absolute instant, RFC 3339 (e.g. 2026-11-01T09:00:00Z)
    #[arg(long)]
    pub at: Option<String>,
    /// Relative to now (e.g. "3days", "2h 30m")
    #[arg(long = "in")]
    pub within: Option<String>,
    #[arg(long, value_enum)]
    pub preset: Option<PresetArg>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PresetArg {
    Day,
    Week,
    Month,
}

impl From<PresetArg> for ExpirationPreset {
    fn from(value: PresetArg) -> Self {
        match value {
            PresetArg::Day => ExpirationPreset::OneDay,
            PresetArg::Week => ExpirationPreset::OneWeek,
            PresetArg::Month => ExpirationPreset::OneMonth,
        }
    }
}

impl When {
    /// Resolve to an instant relative to `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if let Some(raw) = &self.at {
            let parsed = DateTime::parse_from_rfc3339(raw.trim())
                .with_context(|| format!("invalid --at value {raw:?}"))?;
            return Ok(parsed.with_timezone(&Utc));
        }
        if let Some(raw) = &self.within {
            let span = humantime::parse_duration(raw.trim())
                .with_context(|| format!("invalid --in value {raw:?}"))?;
            let span = chrono::Duration::from_std(span)
                .with_context(|| format!("--in value {raw:?} is out of range"))?;
            return now
                .checked_add_signed(span)
                .ok_or_else(|| anyhow!("--in value {raw:?} is out of range"));
        }
        if let Some(preset) = self.preset {
            return Ok(ExpirationPreset::from(preset).expires_at(now));
        }
        Err(anyhow!("one of --at, --in or --preset is required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["expiryd"]).unwrap();
        assert_eq!(cli.command, None);
    }

    #[test]
    fn set_needs_exactly_one_time_source() {
        assert!(Cli::try_parse_from(["expiryd", "set", "a.txt"]).is_err());
        assert!(
            Cli::try_parse_from(["expiryd", "set", "a.txt", "--in", "1h", "--preset", "day"])
                .is_err()
        );

        let cli = Cli::try_parse_from(["expiryd", "set", "a.txt", "--preset", "week"]).unwrap();
        let Some(Command::Set { file, when }) = cli.command else {
            panic!("expected set");
        };
        assert_eq!(file, PathBuf::from("a.txt"));
        assert_eq!(when.preset, Some(PresetArg::Week));
    }

    #[test]
    fn when_resolves_each_form() {
        let at = When {
            at: Some("2026-12-24T18:00:00+01:00".into()),
            within: None,
            preset: None,
        };
        assert_eq!(
            at.resolve(now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 12, 24, 17, 0, 0).unwrap()
        );

        let within = When {
            at: None,
            within: Some("2h 30m".into()),
            preset: None,
        };
        assert_eq!(
            within.resolve(now()).unwrap(),
            now() + chrono::Duration::minutes(150)
        );

        let preset = When {
            at: None,
            within: None,
            preset: Some(PresetArg::Month),
        };
        assert_eq!(
            preset.resolve(now()).unwrap(),
            Utc.with_ymd_and_hms(2026, 11, 19, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn bad_values_are_reported() {
        let bad = When {
            at: Some("tomorrow-ish".into()),
            within: None,
            preset: None,
        };
        let err = bad.resolve(now()).unwrap_err();
        assert!(err.to_string().contains("--at"));
    }

    #[test]
    fn folders_subcommands_parse() {
        let cli = Cli::try_parse_from(["expiryd", "folders", "add", "/srv/in"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Folders {
                action: FolderAction::Add {
                    path: PathBuf::from("/srv/in")
                }
            })
        );
    }
}
