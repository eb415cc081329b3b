use crate::demo::{run_demo, run_template_preview, DemoArgs, TemplateArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use loan_screening::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Loan Screening",
    about = "Run the microfinance loan screening service or walk through a scripted loan cycle",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Inspect the screening questionnaire installed on first start
    Template {
        #[command(subcommand)]
        command: TemplateCommand,
    },
    /// Register a demo client and drive it through two loan cycles
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum TemplateCommand {
    /// Print the standard screening form as JSON
    Show(TemplateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Start without installing the standard screening template
    #[arg(long)]
    pub(crate) no_seed: bool,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Template {
            command: TemplateCommand::Show(args),
        } => run_template_preview(args),
        Command::Demo(args) => run_demo(args),
    }
}
