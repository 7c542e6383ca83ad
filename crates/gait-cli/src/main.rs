// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod commands;
mod config;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime / library errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "gait", version, about = "Trust-plane control boundary for agentic tool invocations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file supplying defaults for --state-root /
    /// --job-root / key-file flags.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Enforce a windowed rate or destructive-budget limit against a tool
    /// call, incrementing its counter if admitted.
    EnforceRateLimit {
        /// Path to the rate-limit counter state file.
        #[arg(long)]
        state_path: Option<PathBuf>,

        /// `tool`, `identity`, or `tool_identity`.
        #[arg(long)]
        scope: String,

        /// `minute` or `hour`.
        #[arg(long)]
        window: String,

        /// Maximum allowed requests within the window.
        #[arg(long)]
        limit: u64,

        /// Tool name the request is scoped under.
        #[arg(long)]
        tool_name: String,

        /// Identity the request is scoped under.
        #[arg(long)]
        identity: String,
    },

    /// Mint and validate signed capability tokens.
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Operate on a persisted job runtime state machine.
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommands {
    /// Mint a signed approval token.
    Mint {
        /// Path to a raw 32-byte Ed25519 signing key seed.
        #[arg(long)]
        key_file: Option<PathBuf>,

        /// Key identifier recorded alongside the signature.
        #[arg(long)]
        key_id: String,

        /// 64-character lowercase hex intent digest.
        #[arg(long)]
        intent_digest: String,

        /// 64-character lowercase hex policy digest.
        #[arg(long)]
        policy_digest: String,

        /// 64-character lowercase hex delegation binding digest.
        #[arg(long)]
        delegation_binding_digest: Option<String>,

        /// Identity of the approver issuing this token.
        #[arg(long)]
        approver_identity: String,

        /// Machine-readable reason code recorded on the token.
        #[arg(long)]
        reason_code: String,

        /// Scope entries this token grants. Repeatable.
        #[arg(long = "scope")]
        scope: Vec<String>,

        /// Token lifetime in seconds.
        #[arg(long)]
        ttl_seconds: i64,

        /// Maximum target count this token may be redeemed against.
        #[arg(long)]
        max_targets: Option<u32>,

        /// Maximum operation count this token may be redeemed against.
        #[arg(long)]
        max_ops: Option<u32>,
    },

    /// Validate a signed approval token against a set of bindings.
    Validate {
        /// Path to a raw 32-byte Ed25519 verifying key.
        #[arg(long)]
        pubkey_file: Option<PathBuf>,

        /// Path to the JSON-encoded approval token to validate.
        #[arg(long)]
        token_file: PathBuf,

        /// 64-character lowercase hex intent digest the token must bind to.
        #[arg(long)]
        intent_digest: String,

        /// 64-character lowercase hex policy digest the token must bind to.
        #[arg(long)]
        policy_digest: String,

        /// 64-character lowercase hex delegation binding digest the token
        /// must bind to.
        #[arg(long)]
        delegation_binding_digest: Option<String>,

        /// Scope entries the token must cover. Repeatable.
        #[arg(long = "required-scope")]
        required_scope: Vec<String>,

        /// Number of targets the redeeming call touches.
        #[arg(long, default_value_t = 1)]
        target_count: u32,

        /// Number of operations the redeeming call performs.
        #[arg(long, default_value_t = 1)]
        op_count: u32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum CheckpointKindArg {
    Decision,
    Blocked,
    Completed,
}

impl From<CheckpointKindArg> for gait_job::CheckpointKind {
    fn from(kind: CheckpointKindArg) -> Self {
        match kind {
            CheckpointKindArg::Decision => gait_job::CheckpointKind::Decision,
            CheckpointKindArg::Blocked => gait_job::CheckpointKind::Blocked,
            CheckpointKindArg::Completed => gait_job::CheckpointKind::Completed,
        }
    }
}

#[derive(Subcommand, Debug)]
enum JobCommands {
    /// Submit a new job, deriving its safety-invariant ledger.
    Submit {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        control_boundary: String,
        #[arg(long)]
        fail_closed: bool,
        #[arg(long)]
        default_privacy: String,
        #[arg(long)]
        environment_fingerprint: Option<String>,
        #[arg(long)]
        policy_digest: Option<String>,
        #[arg(long)]
        policy_ref: Option<String>,
        #[arg(long)]
        identity: Option<String>,
    },

    /// Print a job's current status.
    Status {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
    },

    /// Print a job's full persisted state.
    Inspect {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
    },

    /// Add a checkpoint, transitioning the job's status per its kind.
    AddCheckpoint {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        checkpoint_id: String,
        #[arg(long, value_enum)]
        kind: CheckpointKindArg,
        #[arg(long)]
        label: Option<String>,
    },

    /// Pause a running job.
    Pause {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
    },

    /// Cancel a job from any non-terminal status.
    Cancel {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Record an approval against a pending decision checkpoint.
    Approve {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        checkpoint_id: String,
        #[arg(long)]
        approver_identity: String,
    },

    /// Resume a paused, decision-needed, or blocked job, running the resume
    /// guards in order.
    Resume {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        policy_digest: Option<String>,
        #[arg(long)]
        identity: Option<String>,
        #[arg(long)]
        identity_revoked: bool,
        #[arg(long)]
        environment_fingerprint: Option<String>,
        #[arg(long)]
        allow_environment_mismatch: bool,
    },

    /// Emergency-stop a job, forbidding every further mutation but cancel
    /// and record-blocked-dispatch.
    EmergencyStop {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Record that a tool dispatch was blocked after emergency stop.
    RecordBlockedDispatch {
        #[arg(long)]
        root: Option<PathBuf>,
        #[arg(long)]
        job_id: String,
        #[arg(long)]
        tool_name: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("gait=debug")
    } else {
        EnvFilter::new("gait=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cfg = match config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    };

    let result = dispatch(cli.command, &cfg);
    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value).expect("json serialization cannot fail"));
        }
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn dispatch(command: Commands, cfg: &config::CliConfig) -> anyhow::Result<serde_json::Value> {
    match command {
        Commands::EnforceRateLimit { state_path, scope, window, limit, tool_name, identity } => {
            let state_path = resolve_path(state_path, cfg.state_root.clone(), "--state-path")?;
            commands::enforce_rate_limit(state_path, scope, window, limit, tool_name, identity)
        }

        Commands::Token { command: TokenCommands::Mint {
            key_file,
            key_id,
            intent_digest,
            policy_digest,
            delegation_binding_digest,
            approver_identity,
            reason_code,
            scope,
            ttl_seconds,
            max_targets,
            max_ops,
        } } => {
            let key_file = resolve_path(key_file, cfg.signing_key_file.clone(), "--key-file")?;
            commands::mint_approval_token(
                key_file,
                key_id,
                intent_digest,
                policy_digest,
                delegation_binding_digest,
                approver_identity,
                reason_code,
                scope,
                ttl_seconds,
                max_targets,
                max_ops,
            )
        }

        Commands::Token { command: TokenCommands::Validate {
            pubkey_file,
            token_file,
            intent_digest,
            policy_digest,
            delegation_binding_digest,
            required_scope,
            target_count,
            op_count,
        } } => {
            let pubkey_file = resolve_path(pubkey_file, cfg.verifying_key_file.clone(), "--pubkey-file")?;
            commands::validate_approval_token(
                pubkey_file,
                token_file,
                intent_digest,
                policy_digest,
                delegation_binding_digest,
                required_scope,
                target_count,
                op_count,
            )
        }

        Commands::Job { command } => dispatch_job(command, cfg),
    }
}

fn dispatch_job(command: JobCommands, cfg: &config::CliConfig) -> anyhow::Result<serde_json::Value> {
    match command {
        JobCommands::Submit {
            root,
            job_id,
            control_boundary,
            fail_closed,
            default_privacy,
            environment_fingerprint,
            policy_digest,
            policy_ref,
            identity,
        } => {
            let root = resolve_path(root, cfg.job_root.clone(), "--root")?;
            commands::job_submit(
                root,
                job_id,
                control_boundary,
                fail_closed,
                default_privacy,
                environment_fingerprint,
                policy_digest,
                policy_ref,
                identity,
            )
        }
        JobCommands::Status { root, job_id } => {
            commands::job_status(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id)
        }
        JobCommands::Inspect { root, job_id } => {
            commands::job_inspect(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id)
        }
        JobCommands::AddCheckpoint { root, job_id, checkpoint_id, kind, label } => {
            commands::job_add_checkpoint(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id, checkpoint_id, kind.into(), label)
        }
        JobCommands::Pause { root, job_id } => {
            commands::job_pause(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id)
        }
        JobCommands::Cancel { root, job_id, reason } => {
            commands::job_cancel(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id, reason)
        }
        JobCommands::Approve { root, job_id, checkpoint_id, approver_identity } => {
            commands::job_approve(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id, checkpoint_id, approver_identity)
        }
        JobCommands::Resume {
            root,
            job_id,
            policy_digest,
            identity,
            identity_revoked,
            environment_fingerprint,
            allow_environment_mismatch,
        } => commands::job_resume(
            resolve_path(root, cfg.job_root.clone(), "--root")?,
            job_id,
            policy_digest,
            identity,
            identity_revoked,
            environment_fingerprint,
            allow_environment_mismatch,
        ),
        JobCommands::EmergencyStop { root, job_id, reason } => {
            commands::job_emergency_stop(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id, reason)
        }
        JobCommands::RecordBlockedDispatch { root, job_id, tool_name } => {
            commands::job_record_blocked_dispatch(resolve_path(root, cfg.job_root.clone(), "--root")?, job_id, tool_name)
        }
    }
}

/// Resolves a path flag against its config-file default, erroring if
/// neither is supplied.
fn resolve_path(flag: Option<PathBuf>, default: Option<PathBuf>, flag_name: &str) -> anyhow::Result<PathBuf> {
    flag.or(default)
        .ok_or_else(|| anyhow::anyhow!("{flag_name} is required (pass it directly or set it in --config)"))
}
