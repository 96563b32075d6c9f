use anyhow::Result;
use clap::ArgMatches;

use vmdm::command_registry::{build_app, parse_command, CliCommand};
use vmdm::conf::Settings;
use vmdm::modules::approval::run_once;
use vmdm::AppContext;

#[tokio::main]
async fn main() -> Result<()> {
    let matches: ArgMatches = build_app().get_matches();
    let (config, command) = parse_command(&matches)?;

    if command == CliCommand::Version {
        println!("vmdm {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let settings = Settings::load(config.as_deref())?;
    v::init_tracing(&settings.logging.level)?;
    tracing::info!(sources = ?settings.sources, "settings loaded");

    let app = AppContext::open(settings).await?;
    let result = run(&app, command).await;
    app.close().await;
    result
}

async fn run(app: &AppContext, command: CliCommand) -> Result<()> {
    match command {
        CliCommand::InitDb => app.init_system_tables().await?,
        CliCommand::Reconcile { table: Some(code) } => {
            for report in app.compiler.reconcile(&code).await? {
                tracing::info!(
                    table = %report.table,
                    executed = report.executed.len(),
                    skipped = report.skipped.len(),
                    "reconciled"
                );
            }
        }
        CliCommand::Reconcile { table: None } => {
            let summary = app.compiler.reconcile_all().await?;
            tracing::info!(
                tables = summary.reports.len(),
                failed = summary.failed.len(),
                "reconcile finished"
            );
            if !summary.failed.is_empty() {
                anyhow::bail!("{} 张表迁移失败", summary.failed.len());
            }
        }
        CliCommand::Serve => app.serve().await?,
        CliCommand::Sweep => {
            let (expired, reminded) = run_once(&app.engine).await?;
            tracing::info!(expired, reminded, "sweep finished");
        }
        CliCommand::Version => {}
    }
    Ok(())
}
