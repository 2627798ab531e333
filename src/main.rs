use clap::{Parser, Subcommand};
use cloudwall::compiler::{write_firewall_script, ScriptConfig};
use cloudwall::database::{self, Db};
use cloudwall::progress::ChannelSink;
use cloudwall::tree::Repair;
use cloudwall::VERSION;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Centralized firewall policy management backend", long_about = None)]
struct Args {
    /// Path to the policy database
    #[arg(short = 'b', long, default_value = "cloudwall.db")]
    db_path: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to log to (use "stdout" or "stderr" for console output)
    #[arg(short = 'l', long, default_value = "stdout")]
    log_path: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a firewall's policy into its install script
    Compile {
        #[arg(long)]
        fwcloud: i64,
        #[arg(long)]
        firewall: i64,
        /// Preview-compile a single rule to stdout instead of writing the
        /// script
        #[arg(long)]
        rule: Option<i64>,
        /// Directory the per-firewall script tree is written under
        #[arg(short = 'd', long, default_value = "policy")]
        data_dir: PathBuf,
        /// Script header template, prepended verbatim
        #[arg(long, default_value = "templates/header.sh")]
        header: PathBuf,
        /// Script footer template, appended verbatim
        #[arg(long, default_value = "templates/footer.sh")]
        footer: PathBuf,
    },
    /// Run the tree consistency repair over a tenant
    Repair {
        #[arg(long)]
        fwcloud: i64,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Error loading .env file: {}", e);
        }
    }

    let args = Args::parse();

    let env_filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let subscriber = tracing_subscriber::registry().with(env_filter);
    if args.log_path == "stdout" || args.log_path == "stderr" {
        let subscriber = subscriber.with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    } else {
        let file_appender = tracing_appender::rolling::never("", &args.log_path);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        let subscriber = subscriber.with(fmt::layer().with_writer(non_blocking));
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }

    info!("cloudwall {} starting", VERSION);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> cloudwall::Result<()> {
    let db = Db::builder().db_path(&args.db_path).build().await?;

    // Stream progress lines to the log the way the UI would receive them.
    let (sink, mut rx) = ChannelSink::new();
    let forwarder = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            info!("{}", payload.message.trim_end());
        }
    });

    match args.command {
        Command::Compile {
            fwcloud,
            firewall,
            rule,
            data_dir,
            header,
            footer,
        } => {
            if let Some(rule_id) = rule {
                // Single-rule preview: render to stdout, touch nothing.
                let mut tx = db.begin().await?;
                let rules_data = cloudwall::assembler::assemble_for_compiler(
                    &mut tx,
                    fwcloud,
                    firewall,
                    cloudwall::rules::RuleFamily::Policy,
                    Some(&[rule_id]),
                )
                .await?;
                drop(tx);

                let segments =
                    cloudwall::compiler::PolicyCompiler::compile(&rules_data, &sink);
                for segment in &segments {
                    match &segment.error {
                        Some(e) => error!(rule = segment.id, "rule failed to compile: {e}"),
                        None => print!("{}", segment.cs),
                    }
                }
            } else {
                let config = ScriptConfig::builder()
                    .data_dir(data_dir)
                    .header_file(header)
                    .footer_file(footer)
                    .build();
                let output =
                    write_firewall_script(&db, &config, fwcloud, firewall, &sink).await?;

                for segment in output.segments.iter().filter(|s| s.error.is_some()) {
                    error!(
                        rule = segment.id,
                        "rule failed to compile: {}",
                        segment.error.as_deref().unwrap_or_default()
                    );
                }
                info!(
                    path = %output.path.display(),
                    complete = output.complete,
                    "compile finished"
                );
            }
        }
        Command::Repair { fwcloud } => {
            let mut tx = db.begin().await?;
            let repair = Repair::new(fwcloud, &sink);
            let report = repair.run(&mut tx).await?;
            database::commit(tx).await?;
            info!(
                deleted = report.deleted,
                created = report.created,
                repaired = report.repaired,
                "repair finished"
            );
        }
    }

    drop(sink);
    let _ = forwarder.await;
    db.close().await?;
    Ok(())
}
