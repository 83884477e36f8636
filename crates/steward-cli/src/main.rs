//! steward - oversight administration CLI.
//!
//! Operational front-end for the oversight engine: list pending
//! decision notifications, export the full decision history, inspect a
//! user's sponsorships, issue survey invitations and mark notices as
//! sent.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use steward_core::oversight::Clock;
use steward_core::{
    DecisionRecords, EavStore, MockDirectory, NoticeLog, SecureSurvey, StewardConfig,
    SystemClock,
};
use tracing_subscriber::EnvFilter;

/// steward - oversight administration CLI.
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "steward.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List decisions still awaiting notification.
    Pending,

    /// Export every decision with its detail, one JSON object per line.
    Export,

    /// List a user's current sponsorships.
    Sponsorships {
        /// The user id to look up.
        user_id: String,

        /// Look up sponsorships *by* the user instead of *for* them.
        #[arg(long)]
        investigator: bool,
    },

    /// Issue (or return) a survey invitation code for an address.
    Invite {
        /// The participant's mail address.
        email: String,

        /// Which survey section to use (`saa` or `oversight`).
        #[arg(long, default_value = "saa")]
        survey: String,

        /// Allow a fresh code once the earlier invitation was used.
        #[arg(long)]
        multi: bool,
    },

    /// Mark decision records as notified.
    LogSent {
        /// The decision record ids.
        records: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    let config = StewardConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let store = EavStore::open(&config.store.db)
        .with_context(|| format!("opening store {}", config.store.db.display()))?;
    tracing::debug!(
        project_id = config.oversight.project_id,
        parties = config.oversight.parties,
        "store opened"
    );
    let records = DecisionRecords::new(
        store.clone(),
        Arc::new(MockDirectory::new()),
        Arc::new(SystemClock),
        config.oversight.project_id,
        config.oversight.parties,
    );

    match cli.command {
        Commands::Pending => {
            for decision in records.oversight_decisions(true)? {
                println!(
                    "{}\t{}\t{}",
                    decision.record, decision.decision, decision.parties
                );
            }
        }

        Commands::Export => {
            for decision in records.oversight_decisions(false)? {
                let detail = records
                    .decision_detail(&decision.record, false)
                    .with_context(|| format!("detail of record {}", decision.record))?;
                let line = json!({
                    "record": decision.record,
                    "decision": decision.decision,
                    "investigator": detail.investigator.cn,
                    "team": detail
                        .team
                        .iter()
                        .map(|member| member.cn.as_str())
                        .collect::<Vec<_>>(),
                    "fields": detail.fields,
                });
                println!("{line}");
            }
        }

        Commands::Sponsorships {
            user_id,
            investigator,
        } => {
            for summary in records.about_sponsorships(&user_id, investigator)? {
                println!(
                    "{}\t{}\t{}\t{}",
                    summary.record, summary.investigator, summary.title, summary.description
                );
            }
        }

        Commands::Invite {
            email,
            survey,
            multi,
        } => {
            let Some(section) = config.survey(&survey) else {
                bail!("no [{survey}_survey] section in configuration");
            };
            let issuer = SecureSurvey::new(store, section.survey_id);
            let code = issuer
                .invite(&mut StdRng::from_entropy(), &email, multi)
                .with_context(|| format!("inviting {email}"))?;
            println!("{code}");
        }

        Commands::LogSent { records: ids } => {
            if ids.is_empty() {
                bail!("no records given");
            }
            let now = SystemClock.now();
            let entries: Vec<(String, chrono::NaiveDateTime)> =
                ids.into_iter().map(|record| (record, now)).collect();
            NoticeLog::new(store).log_sent(&entries)?;
        }
    }

    Ok(())
}
