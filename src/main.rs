// src/main.rs — promptkoi entry point

use clap::Parser;

use promptkoi::cli::{self, Cli, Commands};
use promptkoi::infra::config::Config;
use promptkoi::infra::logger;

#[tokio::main]
async fn main() {
    // Respects PROMPTKOI_LOG / RUST_LOG
    logger::init_logging("warn");

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Falls back to defaults if no config.toml
    let config = if let Some(ref path) = cli.config {
        Config::load_from(std::path::Path::new(path))?
    } else {
        Config::load()?
    };

    // Commands that never touch the task store
    match &cli.command {
        Commands::Models => {
            cli::tasks::list_models(&config);
            return Ok(());
        }
        Commands::Migrate { status, rollback } => {
            return cli::migrate::run_migrate(*status, *rollback);
        }
        _ => {}
    }

    let engine = cli::run::open_engine(&config, cli.quiet)?;

    match cli.command {
        Commands::Create(args) => {
            let task = cli::tasks::create_task(&engine, &config, &args)?;
            if args.run {
                cli::run::run_task(engine, &task.id).await?;
            }
        }
        Commands::Run { task_id } => cli::run::run_task(engine, &task_id).await?,
        Commands::Feedback {
            task_id,
            text,
            iteration,
        } => cli::run::run_feedback(engine, &task_id, iteration.as_deref(), &text).await?,
        Commands::Show { task_id, cases } => cli::tasks::show_task(&engine, &task_id, cases)?,
        Commands::List => cli::tasks::list_tasks(&engine)?,
        Commands::Delete { task_id } => cli::tasks::delete_task(&engine, &task_id)?,
        Commands::Reset { task_id } => cli::tasks::reset_task(&engine, &task_id)?,
        Commands::Export { task_id, output } => {
            cli::export::run_export(&engine, &task_id, output.as_deref())?
        }
        Commands::Import { file } => cli::export::run_import(&engine, &file)?,
        Commands::Models | Commands::Migrate { .. } => {}
    }

    Ok(())
}
