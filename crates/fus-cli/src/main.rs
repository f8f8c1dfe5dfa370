use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fus_planner::prelude::*;
use fus_planner::treatment::{PlanOptions, TrackOptions, VirtualFitStepOptions, step_reanalyze};
use log::info;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Focused-ultrasound treatment planning on a session file.
#[derive(Debug, Parser)]
#[command(author, version, about = "Focused-ultrasound treatment planner")]
struct Cli {
    /// Session JSON file, created by `init` and updated by every command.
    #[arg(long, short, global = true, default_value = "session.json")]
    session: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a session from a TreatmentInput JSON file.
    Init {
        #[arg(long)]
        input: PathBuf,
        /// PlanningConfig JSON; defaults are used if omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Search ranked transducer placements for a target.
    VirtualFit {
        #[arg(long)]
        target: String,
        #[arg(long)]
        max_results: Option<usize>,
    },
    /// Register a photoscan (TrackingScan JSON) against the skin surface.
    Track {
        #[arg(long)]
        scan: PathBuf,
        /// Photoscan → patient RigidTransform JSON used as initial guess.
        #[arg(long, conflicts_with = "seed_from_pose")]
        seed: Option<PathBuf>,
        /// Start from the active pose instead of landmarks.
        #[arg(long)]
        seed_from_pose: bool,
    },
    /// Approve a virtual fit or tracking result as the active pose.
    Approve { id: String },
    /// Revoke the active pose.
    Revoke,
    /// Compute a solution for a target against the active pose.
    Plan {
        #[arg(long)]
        target: String,
        /// Also report focal-point to skin distances.
        #[arg(long)]
        skin_distance: bool,
    },
    /// Re-validate the current solution, optionally with a new protocol.
    Reanalyze {
        #[arg(long)]
        protocol: Option<PathBuf>,
    },
    /// Approve the current solution.
    ApproveSolution {
        #[arg(long)]
        acknowledge_warnings: bool,
    },
    /// Export the approved solution for the hardware.
    Handoff {
        /// Write the hand-off JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the session state summary.
    Status,
}

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    active_pose: Option<&'a PoseRef>,
    pose_generation: u64,
    virtual_fits: Vec<(&'a str, ApprovalStatus)>,
    tracking: Vec<(&'a str, ApprovalStatus)>,
    solution: Option<(&'a str, ApprovalStatus)>,
    warnings: usize,
    fatals: usize,
}

fn load_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_session(path: &Path) -> Result<TreatmentSession> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    TreatmentSession::from_json(&data)
        .with_context(|| format!("failed to load session {}", path.display()))
}

fn save_session(session: &TreatmentSession, path: &Path) -> Result<()> {
    fs::write(path, session.to_json()?)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn approve_pose(session: &mut TreatmentSession, id: &str) -> Result<PoseRef> {
    if session.state.virtual_fit(id).is_ok() {
        approve_virtual_fit(session, id)
    } else if session.state.tracking_result(id).is_ok() {
        approve_tracking(session, id)
    } else {
        bail!("no virtual fit or tracking result with id '{id}'")
    }
}

fn status(session: &TreatmentSession) -> Result<String> {
    let state = &session.state;
    let solution = session.output();
    let report = StatusReport {
        active_pose: state.ledger.active_pose.as_ref(),
        pose_generation: state.ledger.pose_generation,
        virtual_fits: state.virtual_fits.iter().map(|r| (r.id.as_str(), r.status)).collect(),
        tracking: state.tracking.iter().map(|r| (r.id.as_str(), r.status)).collect(),
        solution: solution.map(|s| (s.id.as_str(), s.status)),
        warnings: solution.map_or(0, |s| s.analysis.warnings),
        fatals: solution.map_or(0, |s| s.analysis.fatals),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Execute one command against the session file; returns what to print.
fn run(cli: Cli) -> Result<String> {
    if let Command::Init {
        input,
        config,
        description,
    } = &cli.command
    {
        let mut session = match description {
            Some(d) => TreatmentSession::with_description(d.as_str()),
            None => TreatmentSession::new(),
        };
        if let Some(path) = config {
            session.set_config(load_json_file(path)?)?;
        }
        session.set_input(load_json_file(input)?)?;
        save_session(&session, &cli.session)?;
        return Ok(format!("created {}", cli.session.display()));
    }

    let mut session = load_session(&cli.session)?;
    let result = execute(&mut session, cli.command);
    // Refusals are part of the audit trail; keep them even on error.
    save_session(&session, &cli.session)?;
    result
}

fn execute(session: &mut TreatmentSession, command: Command) -> Result<String> {
    let message = match command {
        Command::Init { .. } => bail!("session already loaded"),
        Command::VirtualFit {
            target,
            max_results,
        } => {
            let opts = VirtualFitStepOptions {
                max_results,
                ..Default::default()
            };
            step_virtual_fit(session, &target, Some(opts))?;
            let best = session.state.best_pending_fit().map(|r| r.id.clone());
            format!("best candidate: {}", best.as_deref().unwrap_or("-"))
        }
        Command::Track {
            scan,
            seed,
            seed_from_pose,
        } => {
            let scan: TrackingScan = load_json_file(&scan)?;
            let seed: Option<RigidTransform> = seed.map(|p| load_json_file(&p)).transpose()?;
            let opts = TrackOptions {
                seed,
                seed_from_active_pose: seed_from_pose,
                ..Default::default()
            };
            let id = step_track(session, &scan, Some(opts))?;
            let r = session.state.tracking_result(&id)?;
            format!(
                "{id}: confidence {:.3}{}",
                r.confidence,
                if r.low_confidence { " (low)" } else { "" }
            )
        }
        Command::Approve { id } => {
            let pose = approve_pose(session, &id)?;
            format!("{} active (generation {})", pose.id, pose.generation)
        }
        Command::Revoke => {
            revoke_pose(session)?;
            "pose revoked".to_string()
        }
        Command::Plan {
            target,
            skin_distance,
        } => {
            let opts = PlanOptions {
                skin_distance: skin_distance.then_some(true),
            };
            step_plan(session, &target, Some(opts))?;
            let s = session.require_output()?;
            format!(
                "{}: {} points, {} warnings, {} fatal",
                s.id,
                s.points.len(),
                s.analysis.warnings,
                s.analysis.fatals
            )
        }
        Command::Reanalyze { protocol } => {
            let protocol: Option<Protocol> = protocol.map(|p| load_json_file(&p)).transpose()?;
            step_reanalyze(session, protocol)?;
            let s = session.require_output()?;
            format!("{}: {} ({} fatal)", s.id, s.status, s.analysis.fatals)
        }
        Command::ApproveSolution {
            acknowledge_warnings,
        } => {
            approve_solution(session, acknowledge_warnings)?;
            format!("{} approved", session.require_output()?.id)
        }
        Command::Handoff { output } => {
            let handoff = step_handoff(session, None)?;
            let json = serde_json::to_string_pretty(&handoff)?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    format!("hand-off written to {}", path.display())
                }
                None => json,
            }
        }
        Command::Status => status(session)?,
    };
    info!("{message}");
    Ok(message)
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    println!("{}", run(cli)?);
    Ok(())
}
