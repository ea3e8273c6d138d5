pub mod args;
pub mod commands;
pub mod context;

pub use args::{
    DeliverArgs, GraphFileArgs, OutputFormat, PayloadArgs, PollArgs, ResumeArgs, RunIdArgs,
    StatusArgs, TriggerArgs, ValidateArgs,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{name} {version}\n\
{about-with-newline}\n\
USAGE:\n    {usage}\n\
\nOPTIONS:\n{options}\n\
COMMANDS:\n{subcommands}\n";

#[derive(Parser)]
#[command(name = "omniflow")]
#[command(version = crate::VERSION)]
#[command(about = "Workflow automation engine for omnichannel support graphs")]
#[command(help_template = HELP_TEMPLATE)]
#[command(
    after_long_help = "Typical flow: validate a graph, publish it, trigger runs with events, then wake or deliver events to resume suspended runs."
)]
pub struct Args {
    /// Directory holding published graphs, run state, the outbox and logs
    #[arg(long, global = true, default_value = ".omniflow", value_name = "DIR")]
    pub state_dir: PathBuf,

    /// Send HttpRequest effects over the network instead of recording them in the outbox
    #[arg(long, global = true)]
    pub live_http: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[command(
        about = "Check a graph document without publishing it",
        after_help = "Example:\n    omniflow validate ./graphs/order-status.yaml"
    )]
    Validate(ValidateArgs),
    #[command(
        about = "Validate and publish a graph version",
        long_about = "Publish stores an immutable graph version. Re-publishing identical content is a no-op; changed content under an existing version is refused.",
        after_help = "Example:\n    omniflow publish ./graphs/order-status.yaml"
    )]
    Publish(GraphFileArgs),
    #[command(about = "Render a graph document as Graphviz DOT")]
    Dot(GraphFileArgs),
    #[command(
        about = "Start a run from an inbound event",
        after_help = "Example:\n    omniflow trigger order-status --payload '{\"channel\":\"whatsapp\",\"from\":\"+15550100\",\"text\":\"where is my order\"}'"
    )]
    Trigger(TriggerArgs),
    #[command(about = "Resume a suspended run with a payload")]
    Resume(ResumeArgs),
    #[command(
        about = "Deliver an external event to every run waiting on its key",
        after_help = "Example:\n    omniflow deliver customer-reply:+15550100 --payload '{\"text\":\"12345\"}'"
    )]
    Deliver(DeliverArgs),
    #[command(about = "Wake runs whose timers elapsed, once")]
    Wake,
    #[command(
        about = "Keep waking due runs until interrupted",
        long_about = "Poll runs the resume trigger in the foreground. Console logging is off by default; logs go to <state-dir>/logs."
    )]
    Poll(PollArgs),
    #[command(about = "Cancel a run that has not finished")]
    Cancel(RunIdArgs),
    #[command(about = "Show one run, or list all runs")]
    Status(StatusArgs),
    #[command(about = "Show the committed state transitions of a run")]
    History(RunIdArgs),
}

pub async fn run(args: Args) -> crate::Result<()> {
    match &args.command {
        Command::Validate(validate_args) => commands::validate(validate_args),
        Command::Publish(file_args) => commands::publish(&args, file_args).await,
        Command::Dot(file_args) => commands::dot(file_args),
        Command::Trigger(trigger_args) => commands::trigger(&args, trigger_args).await,
        Command::Resume(resume_args) => commands::resume(&args, resume_args).await,
        Command::Deliver(deliver_args) => commands::deliver(&args, deliver_args).await,
        Command::Wake => commands::wake(&args).await,
        Command::Poll(poll_args) => commands::poll(&args, poll_args).await,
        Command::Cancel(run_args) => commands::cancel(&args, run_args).await,
        Command::Status(status_args) => commands::status(&args, status_args).await,
        Command::History(run_args) => commands::history(&args, run_args).await,
    }
}
