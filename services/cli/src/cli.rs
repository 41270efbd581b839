use std::path::PathBuf;

use academic_lifecycle::config::AppConfig;
use academic_lifecycle::{telemetry, AppError};
use clap::{Args, Parser, Subcommand};

use crate::commands::{
    self, AdmitArgs, BulkPromoteArgs, EvaluateArgs, PromoteArgs, SetRuleArgs, TransferRequestArgs,
};
use crate::demo::{run_demo, DemoArgs};

#[derive(Parser, Debug)]
#[command(
    name = "academic-lifecycle",
    about = "Run academic rule, result, promotion and transfer workflows over a JSON dataset",
    version
)]
struct Cli {
    #[command(flatten)]
    context: ContextArgs,
    #[command(subcommand)]
    command: Command,
}

/// Flags every dataset command shares.
#[derive(Args, Debug, Clone)]
pub(crate) struct ContextArgs {
    /// JSON dataset holding rules, configurations, students, records, logs and transfers
    #[arg(long, global = true, default_value = "academic-dataset.json")]
    pub(crate) dataset: PathBuf,
    /// Identity recorded on audit events and lifecycle records
    #[arg(long, global = true, default_value = "registrar")]
    pub(crate) actor: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an end-to-end walkthrough on a generated dataset
    Demo(DemoArgs),
    /// Inspect or configure academic rules
    Rules {
        #[command(subcommand)]
        command: RulesCommand,
    },
    /// Register a student in the dataset
    Admit(AdmitArgs),
    /// Maintain per-session academic records
    Records {
        #[command(subcommand)]
        command: RecordsCommand,
    },
    /// Evaluate a mark sheet (CSV) and record the result
    Evaluate(EvaluateArgs),
    /// Promote one student into a new session
    Promote(PromoteArgs),
    /// Promote a comma-separated list of students into the same placement
    BulkPromote(BulkPromoteArgs),
    /// Eligibility report for every student in a session without changing anything
    Preview {
        #[arg(long)]
        session: String,
        #[arg(long)]
        program: Option<String>,
    },
    /// Undo a completed promotion
    Rollback {
        /// Promotion log identifier
        #[arg(long)]
        log: String,
    },
    /// Transfer certificate workflow
    Transfer {
        #[command(subcommand)]
        command: TransferCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List rules, optionally limited to one category
    List {
        #[arg(long)]
        category: Option<academic_lifecycle::rules::RuleCategory>,
    },
    /// Store a context-scoped value for a rule
    Set(SetRuleArgs),
    /// Remove the configuration stored for a rule at a context
    Unset {
        code: String,
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum RecordsCommand {
    /// Open the record for the student's current session
    Enroll {
        #[arg(long)]
        student: String,
    },
    Attendance {
        #[arg(long)]
        student: String,
        #[arg(long)]
        percentage: f64,
    },
    Fees {
        #[arg(long)]
        student: String,
        #[arg(long)]
        outstanding: f64,
    },
    Lock {
        #[arg(long)]
        record: String,
    },
    Unlock {
        #[arg(long)]
        record: String,
    },
    /// Status counts for a session cohort
    Summary {
        #[arg(long)]
        session: String,
        #[arg(long)]
        program: Option<String>,
    },
    /// Promotion and transfer history of a student
    History {
        #[arg(long)]
        student: String,
    },
}

#[derive(Subcommand, Debug)]
enum TransferCommand {
    /// Open a transfer request for a student
    Request(TransferRequestArgs),
    Approve {
        #[arg(long)]
        id: String,
    },
    /// Issue the certificate for an approved transfer
    Issue {
        #[arg(long)]
        id: String,
    },
    Cancel {
        #[arg(long)]
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Look a transfer up by its certificate number
    Find {
        tc_number: String,
    },
}

pub(crate) fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let ctx = cli.context;
    match cli.command {
        Command::Demo(args) => run_demo(args, &config),
        Command::Rules { command } => match command {
            RulesCommand::List { category } => commands::list_rules(&ctx, &config, category),
            RulesCommand::Set(args) => commands::set_rule(&ctx, &config, args),
            RulesCommand::Unset {
                code,
                session,
                program,
                department,
            } => commands::unset_rule(&ctx, &config, &code, session, program, department),
        },
        Command::Admit(args) => commands::admit(&ctx, &config, args),
        Command::Records { command } => match command {
            RecordsCommand::Enroll { student } => commands::enroll(&ctx, &config, &student),
            RecordsCommand::Attendance {
                student,
                percentage,
            } => commands::attendance(&ctx, &config, &student, percentage),
            RecordsCommand::Fees {
                student,
                outstanding,
            } => commands::fees(&ctx, &config, &student, outstanding),
            RecordsCommand::Lock { record } => commands::set_lock(&ctx, &config, &record, true),
            RecordsCommand::Unlock { record } => {
                commands::set_lock(&ctx, &config, &record, false)
            }
            RecordsCommand::Summary { session, program } => {
                commands::summary(&ctx, &config, &session, program)
            }
            RecordsCommand::History { student } => commands::history(&ctx, &config, &student),
        },
        Command::Evaluate(args) => commands::evaluate(&ctx, &config, args),
        Command::Promote(args) => commands::promote(&ctx, &config, args),
        Command::BulkPromote(args) => commands::bulk_promote(&ctx, &config, args),
        Command::Preview { session, program } => {
            commands::preview(&ctx, &config, &session, program)
        }
        Command::Rollback { log } => commands::rollback(&ctx, &config, &log),
        Command::Transfer { command } => match command {
            TransferCommand::Request(args) => commands::request_transfer(&ctx, &config, args),
            TransferCommand::Approve { id } => {
                commands::advance_transfer(&ctx, &config, &id, commands::TransferStep::Approve)
            }
            TransferCommand::Issue { id } => {
                commands::advance_transfer(&ctx, &config, &id, commands::TransferStep::Issue)
            }
            TransferCommand::Cancel { id, reason } => commands::advance_transfer(
                &ctx,
                &config,
                &id,
                commands::TransferStep::Cancel(reason),
            ),
            TransferCommand::Find { tc_number } => {
                commands::find_transfer(&ctx, &config, &tc_number)
            }
        },
    }
}
