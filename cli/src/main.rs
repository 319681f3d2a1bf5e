//! The `atlas` binary: flag parsing, console reporting and exit codes. All
//! real work happens in `schema-core`.

mod logger;

use logger::ConsoleLogger;
use schema_connector::{ConnectorError, ConnectorResult, LocalDir, Plan, Report, Reporter, RevisionStore as _, TxMode};
use schema_core::commands::{self, ChangeDetector, CreateMigrationParams, SchemaApplyTxMode, SchemaPlanParams};
use schema_core::{ExecutorOptions, StateSource};
use sql_schema_connector::SqlSchemaConnector;
use std::io::{BufRead as _, Write as _};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use structopt::StructOpt;

const EXIT_USER_ERROR: i32 = 1;
const EXIT_OPERATION_ERROR: i32 = 2;
const EXIT_ABORTED: i32 = 3;

#[derive(Debug, StructOpt)]
#[structopt(name = "atlas", about = "Manage database schemas as code")]
enum Atlas {
    /// Work with the declarative desired state of a database.
    Schema(SchemaCmd),
    /// Work with versioned migration directories.
    Migrate(MigrateCmd),
}

#[derive(Debug, StructOpt)]
enum SchemaCmd {
    /// Inspect a database and print its schema.
    Inspect {
        #[structopt(short = "u", long)]
        url: String,
        #[structopt(long)]
        schema: Vec<String>,
        #[structopt(long)]
        exclude: Vec<String>,
    },
    /// Plan and apply the changes needed to reach a desired state.
    Apply {
        #[structopt(short = "u", long)]
        url: String,
        #[structopt(long = "to", required = true)]
        to: Vec<String>,
        #[structopt(long = "dev-url")]
        dev_url: Option<String>,
        #[structopt(long)]
        dry_run: bool,
        #[structopt(long)]
        auto_approve: bool,
        #[structopt(long = "tx-mode", default_value = "file")]
        tx_mode: String,
        #[structopt(long)]
        schema: Vec<String>,
        #[structopt(long)]
        exclude: Vec<String>,
        #[structopt(long = "lock-timeout", default_value = "10")]
        lock_timeout: u64,
    },
    /// Print the changes between two schema states.
    Diff {
        #[structopt(long = "from", required = true)]
        from: Vec<String>,
        #[structopt(long = "to", required = true)]
        to: Vec<String>,
        #[structopt(long = "dev-url")]
        dev_url: Option<String>,
    },
    /// Drop every object of a database.
    Clean {
        #[structopt(short = "u", long)]
        url: String,
        #[structopt(long)]
        auto_approve: bool,
    },
}

#[derive(Debug, StructOpt)]
enum MigrateCmd {
    /// Plan a new migration file against the desired state.
    Diff {
        /// A short description for the file name.
        name: Option<String>,
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
        #[structopt(long = "to", required = true)]
        to: Vec<String>,
        #[structopt(long = "dev-url")]
        dev_url: String,
        #[structopt(long = "lock-timeout", default_value = "10")]
        lock_timeout: u64,
    },
    /// Apply pending migration files to a database.
    Apply {
        /// Apply at most this many pending files.
        count: Option<usize>,
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
        #[structopt(short = "u", long)]
        url: String,
        #[structopt(long)]
        dry_run: bool,
        #[structopt(long = "tx-mode", default_value = "file")]
        tx_mode: String,
        #[structopt(long = "baseline")]
        baseline: Option<String>,
        #[structopt(long = "from")]
        from: Option<String>,
        #[structopt(long)]
        allow_dirty: bool,
        #[structopt(long = "revisions-schema")]
        revisions_schema: Option<String>,
        #[structopt(long = "lock-timeout", default_value = "10")]
        lock_timeout: u64,
    },
    /// Show the migration state of a database.
    Status {
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
        #[structopt(short = "u", long)]
        url: String,
        #[structopt(long = "revisions-schema")]
        revisions_schema: Option<String>,
    },
    /// Validate the directory against its sum file (and optionally replay
    /// it on a dev database).
    Validate {
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
        #[structopt(long = "dev-url")]
        dev_url: Option<String>,
    },
    /// Recompute the sum file.
    Hash {
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
    },
    /// Create a new empty migration file.
    New {
        name: Option<String>,
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
    },
    /// Declare the database revision state manually.
    Set {
        version: String,
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
        #[structopt(short = "u", long)]
        url: String,
    },
    /// Analyze new migration files for risky changes.
    Lint {
        #[structopt(long, default_value = "file://migrations")]
        dir: String,
        #[structopt(long = "dev-url")]
        dev_url: String,
        /// Treat the latest N files as new.
        #[structopt(long)]
        latest: Option<usize>,
        /// Treat files added since this git revision as new.
        #[structopt(long = "git-base")]
        git_base: Option<String>,
        #[structopt(long = "git-dir", default_value = ".")]
        git_dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opts = Atlas::from_args();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("tokio runtime");

    std::process::exit(runtime.block_on(run(opts)));
}

async fn run(opts: Atlas) -> i32 {
    let outcome = match opts {
        Atlas::Schema(cmd) => run_schema(cmd).await,
        Atlas::Migrate(cmd) => run_migrate(cmd).await,
    };

    match outcome {
        Ok(code) => code,
        Err(err) if err.is_user_error() => {
            eprintln!("Error: {err}");
            EXIT_USER_ERROR
        }
        Err(err) => {
            eprintln!("Error: {err}");
            EXIT_OPERATION_ERROR
        }
    }
}

async fn run_schema(cmd: SchemaCmd) -> ConnectorResult<i32> {
    match cmd {
        SchemaCmd::Inspect { url, schema, exclude } => {
            let options = schema_connector::InspectOptions {
                schemas: schema,
                tables: vec![],
                exclude,
            };
            let realm = commands::schema_inspect(&url, &options).await?;
            print!("{}", schema_hcl::render_realm(&realm));
            Ok(0)
        }
        SchemaCmd::Apply {
            url,
            to,
            dev_url,
            dry_run,
            auto_approve,
            tx_mode,
            schema,
            exclude,
            lock_timeout,
        } => {
            let tx_mode = match tx_mode.as_str() {
                "none" => SchemaApplyTxMode::None,
                "file" => SchemaApplyTxMode::File,
                other => {
                    return Err(ConnectorError::configuration(format!(
                        "invalid --tx-mode {other:?} (expected none or file)"
                    )))
                }
            };

            let (target, plan) = commands::schema_plan(SchemaPlanParams {
                url: Some(url.as_str()),
                from: &[],
                to: &to,
                dev_url: dev_url.as_deref(),
                inspect: schema_connector::InspectOptions {
                    schemas: schema,
                    tables: vec![],
                    exclude,
                },
                diff_options: Default::default(),
                lock_timeout: Duration::from_secs(lock_timeout),
            })
            .await?;

            if plan.is_empty() {
                println!("Schema is synced, no changes to be made.");
                return Ok(0);
            }

            print_plan(&plan);

            if dry_run {
                return Ok(0);
            }
            if !auto_approve && !confirm("Apply?")? {
                println!("Abort.");
                return Ok(EXIT_ABORTED);
            }

            let mut target = target.expect("schema apply always has a target");
            let applied =
                commands::schema_apply_execute(&mut target, &plan, tx_mode, Duration::from_secs(lock_timeout)).await?;
            println!("Applied {applied} statement(s).");
            Ok(0)
        }
        SchemaCmd::Diff { from, to, dev_url } => {
            let (_, plan) = commands::schema_plan(SchemaPlanParams {
                url: None,
                from: &from,
                to: &to,
                dev_url: dev_url.as_deref(),
                inspect: Default::default(),
                diff_options: Default::default(),
                lock_timeout: Duration::from_secs(10),
            })
            .await?;

            if plan.is_empty() {
                println!("Schemas are synced, no changes to be made.");
            } else {
                print_plan(&plan);
            }
            Ok(0)
        }
        SchemaCmd::Clean { url, auto_approve } => {
            if !auto_approve && !confirm(&format!("Drop every object on {url}?"))? {
                println!("Abort.");
                return Ok(EXIT_ABORTED);
            }
            commands::schema_clean(&url).await?;
            println!("Database cleaned.");
            Ok(0)
        }
    }
}

async fn run_migrate(cmd: MigrateCmd) -> ConnectorResult<i32> {
    match cmd {
        MigrateCmd::Diff {
            name,
            dir,
            to,
            dev_url,
            lock_timeout,
        } => {
            let dir = LocalDir::create(dir_path(&dir))?;
            let mut dev = SqlSchemaConnector::connect(&dev_url)?;
            let created = commands::create_migration(
                &mut dev,
                CreateMigrationParams {
                    name: name.as_deref().unwrap_or("migration"),
                    dir: &dir,
                    desired: StateSource::parse_many(&to)?,
                    diff_options: Default::default(),
                    lock_timeout: Duration::from_secs(lock_timeout),
                },
            )
            .await?;

            match created {
                Some(file_name) => println!("Created {file_name}."),
                None => println!("The migration directory is synced with the desired state, no changes to be made."),
            }
            Ok(0)
        }
        MigrateCmd::Apply {
            count,
            dir,
            url,
            dry_run,
            tx_mode,
            baseline,
            from,
            allow_dirty,
            revisions_schema,
            lock_timeout,
        } => {
            let dir = LocalDir::open(dir_path(&dir))?;
            let mut connector = SqlSchemaConnector::connect(&url)?;
            if let Some(table) = revisions_schema {
                connector.set_revision_table(table);
            }

            let options = ExecutorOptions {
                tx_mode: tx_mode.parse::<TxMode>()?,
                allow_dirty,
                baseline_version: baseline,
                from_version: from,
                count,
                lock_timeout: Duration::from_secs(lock_timeout),
                dry_run,
                logger: Arc::new(ConsoleLogger),
                ..Default::default()
            };

            schema_core::apply_migrations(&mut connector, &dir, &options).await?;
            Ok(0)
        }
        MigrateCmd::Status {
            dir,
            url,
            revisions_schema,
        } => {
            let dir = LocalDir::open(dir_path(&dir))?;
            let mut connector = SqlSchemaConnector::connect(&url)?;
            if let Some(table) = revisions_schema {
                connector.set_revision_table(table);
            }

            let report = commands::migrate_status(&mut connector, &dir).await?;
            println!("Migration Status: {}", report.status);
            println!(
                "  -- Current Version: {}",
                report.current.as_deref().unwrap_or("No migration applied yet")
            );
            println!("  -- Executed Files:  {}", report.executed);
            println!("  -- Pending Files:   {}", report.pending_files.len());
            if let Some(partial) = &report.partially_applied {
                println!("  -- Version {partial} was only partially applied; fix the file and re-run apply.");
            }
            Ok(0)
        }
        MigrateCmd::Validate { dir, dev_url } => {
            let dir = LocalDir::open(dir_path(&dir))?;
            let mut dev = match dev_url {
                Some(url) => Some(SqlSchemaConnector::connect(&url)?),
                None => None,
            };
            commands::migrate_validate(
                &dir,
                dev.as_mut().map(|d| d as &mut dyn schema_connector::SchemaConnector),
                Duration::from_secs(10),
            )
            .await?;
            println!("Directory is valid.");
            Ok(0)
        }
        MigrateCmd::Hash { dir } => {
            let dir = LocalDir::open(dir_path(&dir))?;
            commands::migrate_hash(&dir)?;
            Ok(0)
        }
        MigrateCmd::New { name, dir } => {
            let dir = LocalDir::create(dir_path(&dir))?;
            let file_name = commands::migrate_new(&dir, name.as_deref().unwrap_or(""))?;
            println!("Created {file_name}.");
            Ok(0)
        }
        MigrateCmd::Set { version, dir, url } => {
            let dir = LocalDir::open(dir_path(&dir))?;
            let mut connector = SqlSchemaConnector::connect(&url)?;
            commands::migrate_set(
                &mut connector,
                &dir,
                &version,
                &format!("atlas v{}", env!("CARGO_PKG_VERSION")),
            )
            .await?;
            let revisions = connector.read_revisions().await?;
            println!("Ledger now holds {} revision(s), up to version {version}.", revisions.len());
            Ok(0)
        }
        MigrateCmd::Lint {
            dir,
            dev_url,
            latest,
            git_base,
            git_dir,
        } => {
            let dir_raw = dir_path(&dir);
            let dir = LocalDir::open(&dir_raw)?;
            let detector = match (latest, git_base) {
                (Some(n), None) => ChangeDetector::Latest(n),
                (None, Some(base)) => ChangeDetector::Git {
                    work_dir: git_dir,
                    base,
                    dir_path: PathBuf::from(dir_raw),
                },
                _ => {
                    return Err(ConnectorError::configuration(
                        "pass exactly one of --latest or --git-base",
                    ))
                }
            };

            let mut dev = SqlSchemaConnector::connect(&dev_url)?;
            let reports = commands::migrate_lint(
                &mut dev,
                schema_core::commands::LintParams {
                    logger: Arc::new(ConsoleLogger),
                    ..schema_core::commands::LintParams::new(&dir, detector)
                },
            )
            .await?;

            let reporter = ConsoleReporter;
            let mut total = 0;
            for report in &reports {
                reporter.report_file(report);
                total += report.diagnostics.len();
            }
            if total > 0 { Ok(EXIT_OPERATION_ERROR) } else { Ok(0) }
        }
    }
}

fn dir_path(raw: &str) -> String {
    raw.strip_prefix("file://").unwrap_or(raw).to_owned()
}

fn print_plan(plan: &Plan) {
    println!("-- Planned Changes:");
    for change in &plan.changes {
        if let Some(comment) = &change.comment {
            println!("-- {comment}");
        }
        println!("{};", change.cmd);
    }
}

struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn report_file(&self, report: &Report) {
        if report.diagnostics.is_empty() {
            println!("{}: ok", report.file_name);
            return;
        }
        println!("{}:", report.file_name);
        for diagnostic in &report.diagnostics {
            println!("  {}: {}", diagnostic.code, diagnostic.text);
        }
    }
}

fn confirm(prompt: &str) -> ConnectorResult<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout()
        .flush()
        .map_err(|err| ConnectorError::io("flushing stdout", err))?;

    let mut answer = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|err| ConnectorError::io("reading confirmation", err))?;

    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
