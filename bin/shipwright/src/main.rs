//! shipwright builds a Rust service into a runtime image, pushes it under a UTC timestamp tag
//! and applies the Kubernetes manifest that references it.

mod cli;

use anyhow::Result;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::Cli;
use shipwright_deploy::{
    DeployReport, ImageTag, PipelineBuilder, PipelineConfig, PipelineError, RunOptions, Stage,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    if let Err(err) = run(cli).await {
        let stage = err.stage().map_or("config".to_string(), |s: Stage| s.to_string());
        tracing::error!(%stage, "{err}");
        std::process::exit(err.exit_code());
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<(), PipelineError> {
    let config = PipelineConfig::load(cli.config.as_deref()).map_err(PipelineError::Config)?;
    let mut builder = cli.builder(config);

    if let Some(path) = &cli.save_config {
        let config = builder.into_config();
        config.save_to_file(path).map_err(PipelineError::Config)?;
        builder = PipelineBuilder::new(config);
    }

    let pipeline = builder.build()?;

    if cli.dry_run {
        let tag = cli.tag.unwrap_or_else(ImageTag::now);
        tracing::info!(
            %tag,
            image = %pipeline.target_image(&tag),
            manifest = %pipeline.config().cluster.manifest.display(),
            "Dry run, nothing is built or applied"
        );
        println!("{}", pipeline.render(&tag)?);
        return Ok(());
    }

    let report = pipeline
        .run_with(RunOptions {
            tag: cli.tag,
            skip_build: cli.skip_build,
        })
        .await?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &DeployReport) {
    println!("Deployed {}", report.image);

    for resource in &report.outcome.resources {
        println!("  {} {}", resource.resource, resource.action);
    }

    if report.endpoints.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Endpoint", "URL"]);
    for endpoint in &report.endpoints {
        table.add_row(vec![endpoint.name.clone(), endpoint.url.to_string()]);
    }
    println!("{table}");
}
