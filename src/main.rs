use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use competency_evaluation::api::http::HttpScoringApi;
use competency_evaluation::api::ScoringApi;
use competency_evaluation::config::{self, BackendKind, Settings};
use competency_evaluation::db::{self, PgScoringApi};
use competency_evaluation::grade::GradeSummary;
use competency_evaluation::models::StudentId;
use competency_evaluation::report;
use competency_evaluation::session::{EvaluationSession, LoadOutcome};

#[derive(Parser)]
#[command(name = "competency-evaluation")]
#[command(about = "Score students against randomized RAC samples and review the results", long_about = None)]
struct Cli {
    #[arg(long, value_enum, env = "COMPETENCIAS_BACKEND", default_value = "http", global = true)]
    backend: BackendKind,

    #[arg(long, env = "COMPETENCIAS_API_URL", default_value = config::DEFAULT_API_URL, global = true)]
    api_url: String,

    #[arg(long, env = "COMPETENCIAS_API_TOKEN", hide_env_values = true, global = true)]
    api_token: Option<String>,

    #[arg(long, env = "DATABASE_URL", hide_env_values = true, global = true)]
    database_url: Option<String>,

    #[arg(long, env = "COMPETENCIAS_TIMEOUT_SECS", default_value_t = config::DEFAULT_TIMEOUT_SECS, global = true)]
    timeout_secs: u64,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample GACs, RACs and students
    Seed,
    /// List enrolled students
    Roster,
    /// Draw a random sample of RACs per GAC
    Sample,
    /// Show the saved scores of a student
    Scores {
        #[arg(long)]
        student: StudentId,
    },
    /// Score a student interactively against a fresh sample
    Evaluate {
        #[arg(long)]
        student: StudentId,
        /// Save each score as soon as it is entered
        #[arg(long)]
        single: bool,
    },
    /// Print general and per-GAC statistics
    Stats,
    /// Generate a markdown report
    Report {
        #[arg(long)]
        student: Option<StudentId>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    let settings = Settings::resolve(
        cli.backend,
        &cli.api_url,
        cli.api_token.clone(),
        cli.database_url.clone(),
        cli.timeout_secs,
    )?;

    match cli.command {
        Commands::InitDb => {
            let Settings::Postgres { database_url } = &settings else {
                bail!("init-db requires --backend postgres");
            };
            let pool = db::connect(database_url).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let Settings::Postgres { database_url } = &settings else {
                bail!("seed requires --backend postgres");
            };
            let pool = db::connect(database_url).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Roster => {
            let api = connect_backend(&settings).await?;
            let roster = api.roster().await.context("failed to load students")?;

            if roster.is_empty() {
                println!("No enrolled students.");
                return Ok(());
            }

            println!("Enrolled students:");
            for student in roster.iter() {
                println!(
                    "- [{}] {} ({}, group {})",
                    student.id, student.name, student.document, student.group
                );
            }
        }
        Commands::Sample => {
            let api = connect_backend(&settings).await?;
            let sample = api
                .item_sample()
                .await
                .context("failed to generate item sample")?;

            if sample.is_empty() {
                println!("No RACs available.");
                return Ok(());
            }

            for (gac_number, racs) in sample.groups() {
                println!("GAC {gac_number}:");
                for rac in racs {
                    println!("- [{}] RAC {}: {}", rac.id, rac.number, rac.description);
                }
            }
        }
        Commands::Scores { student } => {
            let api = connect_backend(&settings).await?;
            let scores = api
                .student_scores(student)
                .await
                .with_context(|| format!("failed to load scores for student {student}"))?;

            if scores.is_empty() {
                println!("No scores saved for student {student}.");
                return Ok(());
            }

            for score in scores.iter() {
                println!("- RAC {}: {}", score.rac_id, score.puntaje);
            }
            let summary = GradeSummary::from_scores(scores.iter().map(|score| score.puntaje));
            println!(
                "Average: {} [{}]",
                summary.classification.formatted(),
                summary.classification.tier
            );
        }
        Commands::Evaluate { student, single } => {
            let api = connect_backend(&settings).await?;
            evaluate(api, student, single).await?;
        }
        Commands::Stats => {
            let api = connect_backend(&settings).await?;
            let session = EvaluationSession::new(api);
            let statistics = session.refresh_statistics().await?;
            print!("{}", report::build_statistics_report(&statistics));
        }
        Commands::Report { student, out } => {
            let api = connect_backend(&settings).await?;
            let output = match student {
                Some(student) => {
                    let results = api
                        .student_results(student)
                        .await
                        .with_context(|| format!("failed to load results for student {student}"))?;
                    report::build_student_report(&results)
                }
                None => {
                    let session = EvaluationSession::new(api);
                    let statistics = session.refresh_statistics().await?;
                    report::build_statistics_report(&statistics)
                }
            };

            match out {
                Some(out) => {
                    std::fs::write(&out, output)?;
                    println!("Report written to {}.", out.display());
                }
                None => print!("{output}"),
            }
        }
    }

    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("COMPETENCIAS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

async fn connect_backend(settings: &Settings) -> anyhow::Result<Arc<dyn ScoringApi>> {
    let api: Arc<dyn ScoringApi> = match settings {
        Settings::Http(api) => Arc::new(HttpScoringApi::new(api)?),
        Settings::Postgres { database_url } => {
            Arc::new(PgScoringApi::new(db::connect(database_url).await?))
        }
    };
    tracing::debug!(backend = ?settings.backend(), "backend ready");
    Ok(api)
}

async fn prompt(
    lines: &mut Lines<BufReader<Stdin>>,
    label: &str,
) -> anyhow::Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    lines.next_line().await.context("failed to read input")
}

async fn evaluate(
    api: Arc<dyn ScoringApi>,
    student_id: StudentId,
    single: bool,
) -> anyhow::Result<()> {
    let session = EvaluationSession::new(api);
    session.initialize().await?;

    if session.select_student(Some(student_id)).await? == LoadOutcome::Superseded {
        bail!("student selection was superseded");
    }

    let snapshot = session.snapshot();
    if let Some(student) = &snapshot.student {
        println!("Evaluating {} (group {})", student.name, student.group);
    }
    println!("Enter a score from 1 to 5; leave blank to keep the current value.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    for (gac_number, racs) in snapshot.sample.groups() {
        println!();
        println!("GAC {gac_number}");
        for rac in racs {
            let current = snapshot
                .draft(rac.id)
                .map(|puntaje| puntaje.to_string())
                .unwrap_or_else(|| "-".to_string());
            loop {
                let label = format!("RAC {} {} [{current}]: ", rac.number, rac.description);
                let Some(line) = prompt(&mut lines, &label).await? else {
                    bail!("input closed before the evaluation was complete");
                };
                if line.trim().is_empty() || session.set_item_value(rac.id, &line) {
                    break;
                }
                println!("Scores must be whole numbers from 1 to 5.");
            }

            if single && session.snapshot().draft(rac.id).is_some() {
                match session.submit_one(rac.id).await {
                    Ok(saved) => println!(
                        "Saved RAC {} = {} ({}).",
                        rac.number,
                        saved.puntaje,
                        if saved.created { "created" } else { "updated" }
                    ),
                    Err(e) => println!("Could not save RAC {}: {e}", rac.number),
                }
            }
        }
    }

    if !single {
        let report = session.submit_all().await?;
        println!();
        println!("{}.", report.summary());
    }

    let snapshot = session.snapshot();
    println!();
    for (gac_number, summary) in report::summarize_sheet(&snapshot) {
        println!(
            "GAC {gac_number}: {} [{}]",
            summary.classification.formatted(),
            summary.classification.tier
        );
    }
    let overall =
        GradeSummary::from_scores(snapshot.drafts.values().flatten().copied()).classification;
    println!("Overall: {} [{}]", overall.formatted(), overall.severity());

    Ok(())
}
