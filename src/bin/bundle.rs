use std::io::{self, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

use project_bundles::bundle::{BundleService, DomainSummary, ExportRequest, Selection};
use project_bundles::config::BundleConfig;
use project_bundles::project::{PgProject, run_migrations};

#[derive(Parser, Debug)]
#[command(
    name = "bundle",
    about = "Export and import project configuration bundles"
)]
struct Args {
    /// Project to operate on (defaults to PROJECT_NAME).
    #[arg(long, global = true)]
    project: Option<String>,

    /// Print summaries as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the bundles in the store.
    List,
    /// Show a bundle's metadata and components.
    Info { name: String },
    /// Export the live project into a new bundle.
    Export {
        name: String,

        #[arg(long, default_value = "")]
        author: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Comma-separated domain flags: wiki, ticket, archive, group, list, milestone.
        #[arg(long, value_delimiter = ',', default_value = "wiki,ticket,archive,group,list,milestone")]
        domains: Vec<String>,
    },
    /// Replace live project state with a bundle's contents.
    Import { name: String },
}

fn print_domains(domains: &[DomainSummary]) {
    for domain in domains {
        println!("  {domain}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let mut config = BundleConfig::from_env();
    if let Some(project) = args.project.as_deref().map(str::trim) {
        if project.is_empty() {
            writeln!(io::stderr(), "error: --project must not be empty")?;
            std::process::exit(2);
        }
        config.project_name = project.to_string();
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;
    run_migrations(&pool).await?;

    let project = PgProject::new(
        pool.clone(),
        config.project_name.clone(),
        config.project_env.clone(),
        config.repository_path(&config.project_name),
    );
    let service = BundleService::new(config, Arc::new(project));

    let success = match args.command {
        Command::List => {
            let names = service.list()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                for name in names {
                    println!("{name}");
                }
            }
            true
        }
        Command::Info { name } => {
            let info = service.info(&name)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("name:        {}", info.metadata.name);
                println!("project:     {}", info.metadata.project);
                println!("author:      {}", info.metadata.author);
                println!("created:     {}", info.metadata.created);
                println!("description: {}", info.metadata.description);
                println!("components:  {}", info.components.join(", "));
            }
            true
        }
        Command::Export {
            name,
            author,
            description,
            domains,
        } => {
            let selection = match Selection::from_flags(domains.iter().filter(|d| !d.trim().is_empty())) {
                Ok(selection) => selection,
                Err(err) => {
                    writeln!(io::stderr(), "error: {err}")?;
                    std::process::exit(2);
                }
            };
            let request = ExportRequest {
                name,
                author,
                description,
                selection,
            };
            let summary = service.export(&request).await?.summary();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("exported bundle {}", summary.bundle);
                print_domains(&summary.domains);
                if let Some(err) = &summary.metadata_error {
                    println!("  metadata       FAILED  {err}");
                }
            }
            summary.success
        }
        Command::Import { name } => {
            let summary = service.import(&name).await?.summary();
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("imported bundle {}", summary.bundle);
                print_domains(&summary.domains);
            }
            summary.success
        }
    };

    pool.close().await;

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
