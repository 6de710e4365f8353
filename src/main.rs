use anyhow::Result;
use clap::Parser;
use mdapply::cli::{AppContext, Cli, Commands};
use mdapply::cli_ext::{backup_cmd, review_cmd};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // MDA_LOG=debug for engine traces; stdout stays clean for --json
    let env_filter = EnvFilter::try_from_env("MDA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .try_init();

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
    };
    let root = cli.root;

    match cli.command {
        Commands::Parse(args) => review_cmd::parse_response(args, &ctx),
        Commands::Review(args) => review_cmd::review(args, root, &ctx),
        Commands::Status(args) => review_cmd::status(args, root, &ctx),
        Commands::Show(args) => review_cmd::show(args, root, &ctx),
        Commands::Apply(args) => review_cmd::apply(args, root, &ctx),
        Commands::Revert(args) => review_cmd::revert(args, root, &ctx),
        Commands::Focus(args) => review_cmd::focus(args, root, &ctx),
        Commands::End => review_cmd::end(root, &ctx),
        Commands::Reenter(args) => review_cmd::reenter(args, root, &ctx),
        Commands::Discard => review_cmd::discard(root, &ctx),
        Commands::Select(args) => review_cmd::select(args, root, &ctx),
        Commands::Backup(args) => backup_cmd::run(args, root, &ctx),
        Commands::Init(args) => {
            let root = mdapply::infra::io::discover_root(root, &std::env::current_dir()?);
            mdapply::infra::config::init(&args, &root, &ctx)
        }
        Commands::Completions(args) => mdapply::completion::run(args, &ctx),
    }
}
