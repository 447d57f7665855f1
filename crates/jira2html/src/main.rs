use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use jira2html_core::doc_index::DocumentIndex;
use jira2html_core::generate::generate_site;
use jira2html_core::links::{LinkPatterns, LinkRewriter};
use jira2html_core::resolver::{ReferenceResolver, candidate_keys};
use jira2html_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, Runtime, ensure_runtime_ready_for_generate,
    init_layout, inspect_runtime, resolve_runtime,
};

#[derive(Debug, Parser)]
#[command(
    name = "jira2html",
    version,
    about = "Render a Jira issue export as an offline HTML site linked to a local documentation corpus"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    output_dir: Option<PathBuf>,
    #[arg(
        long = "docs-root",
        global = true,
        value_name = "PATH",
        help = "Documentation corpus root (repeatable; replaces configured roots)"
    )]
    docs_roots: Vec<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    docs_roots: Vec<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            output_dir: cli.output_dir.clone(),
            docs_roots: cli.docs_roots.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the offline site from the issue export
    Generate,
    /// Create the project layout and a starter config
    Init(InitArgs),
    /// Show resolved paths and input readiness
    Status,
    /// Documentation index inspection
    Index(IndexArgs),
    /// Resolve one documentation reference against the index
    Resolve(ResolveArgs),
    /// Rewrite documentation links in a piece of issue text
    Rewrite(RewriteArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
    #[arg(long, help = "Only create directories")]
    no_config: bool,
}

#[derive(Debug, Args)]
struct IndexArgs {
    #[command(subcommand)]
    command: IndexSubcommand,
}

#[derive(Debug, Subcommand)]
enum IndexSubcommand {
    /// Build the index and print key counts
    Stats,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    #[arg(value_name = "REFERENCE")]
    reference: String,
    #[arg(long, help = "Print the lookup keys tried for the reference")]
    show_keys: bool,
}

#[derive(Debug, Args)]
struct RewriteArgs {
    #[arg(value_name = "TEXT")]
    text: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Generate) => run_generate(&runtime),
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        Some(Commands::Index(args)) => match args.command {
            IndexSubcommand::Stats => run_index_stats(&runtime),
        },
        Some(Commands::Resolve(args)) => run_resolve(&runtime, args),
        Some(Commands::Rewrite(args)) => run_rewrite(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_generate(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_for(runtime)?;
    let status = inspect_runtime(&resolved)?;
    ensure_runtime_ready_for_generate(&resolved.paths, &status)?;

    let report = generate_site(&resolved)?;
    println!("generate.output_dir: {}", normalize_path(&report.output_dir));
    println!("generate.index_page: {}", normalize_path(&report.index_page));
    println!("generate.docs_indexed: {}", report.index_stats.files_indexed);
    println!("generate.authors_loaded: {}", report.authors_loaded);
    println!("generate.issues_loaded: {}", report.issues_loaded);
    println!("generate.issues_written: {}", report.issues_written);
    println!("generate.ordered_keys: {}", report.ordered_keys);
    println!("generate.attachments_found: {}", report.attachments_found);
    println!("generate.attachments_missing: {}", report.attachments_missing);
    println!("generate.references_resolved: {}", report.references.resolved);
    println!(
        "generate.references_unresolved: {}",
        report.references.unresolved
    );
    println!(
        "generate.conversion_fallbacks: {}",
        report.conversion_fallbacks
    );
    print_warnings(&report.warnings);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.diagnostics());
    }
    Ok(())
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let resolved = resolve_runtime_for(runtime)?;
    let paths = &resolved.paths;
    let report = init_layout(
        paths,
        &InitOptions {
            materialize_config: !args.no_config,
            force: args.force,
        },
    )?;

    println!("initialized project root: {}", normalize_path(&paths.project_root));
    if report.created_dirs.is_empty() {
        println!("directories: already present");
    } else {
        for dir in &report.created_dirs {
            println!("created: {}", normalize_path(dir));
        }
    }
    if args.no_config {
        println!("config: skipped (--no-config)");
    } else if report.wrote_config {
        println!("config: wrote {}", normalize_path(&paths.config_path));
    } else {
        println!(
            "config: kept existing {} (use --force to overwrite)",
            normalize_path(&paths.config_path)
        );
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.diagnostics());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_for(runtime)?;
    let paths = &resolved.paths;
    let status = inspect_runtime(&resolved)?;

    println!(
        "project_root: {} ({})",
        normalize_path(&paths.project_root),
        format_flag(status.project_root_exists)
    );
    println!(
        "config: {} ({})",
        normalize_path(&paths.config_path),
        format_flag(status.config_exists)
    );
    println!(
        "issues_dir: {} ({})",
        normalize_path(&paths.issues_dir),
        format_flag(status.issues_dir_exists)
    );
    println!("issue_files: {}", status.issue_files);
    println!(
        "attachment_dir: {} ({})",
        normalize_path(&paths.attachment_dir),
        format_flag(status.attachment_dir_exists)
    );
    println!(
        "output_dir: {} ({})",
        normalize_path(&paths.output_dir),
        format_flag(status.output_dir_exists)
    );
    println!(
        "order_csv: {} ({})",
        normalize_path(&paths.order_csv),
        format_flag(status.order_csv_exists)
    );
    println!(
        "author_map: {} ({})",
        normalize_path(&paths.author_map),
        format_flag(status.author_map_exists)
    );
    println!(
        "docs_roots: {} configured, {} found",
        paths.docs_roots.len(),
        status.docs_roots_found
    );
    println!(
        "docs_base_url: {}",
        resolved.docs_base_url.as_deref().unwrap_or("<unset>")
    );
    print_warnings(&status.warnings);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.diagnostics());
    }
    Ok(())
}

fn run_index_stats(runtime: &RuntimeOptions) -> Result<()> {
    let resolved = resolve_runtime_for(runtime)?;
    let index = DocumentIndex::build(&resolved.paths.docs_roots);
    let stats = index.stats();

    println!("index.roots_scanned: {}", stats.roots_scanned);
    for root in &stats.roots_skipped {
        println!("index.root_skipped: {}", normalize_path(root));
    }
    println!("index.files_indexed: {}", stats.files_indexed);
    println!("index.exact_keys: {}", stats.exact_keys);
    println!(
        "index.without_extension_keys: {}",
        stats.without_extension_keys
    );
    println!("index.normalized_keys: {}", stats.normalized_keys);
    println!("index.exact_collisions: {}", stats.exact_collisions);
    println!(
        "index.without_extension_collisions: {}",
        stats.without_extension_collisions
    );
    println!(
        "index.normalized_collisions: {}",
        stats.normalized_collisions
    );
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.diagnostics());
    }
    Ok(())
}

fn run_resolve(runtime: &RuntimeOptions, args: ResolveArgs) -> Result<()> {
    let resolved = resolve_runtime_for(runtime)?;
    let index = DocumentIndex::build(&resolved.paths.docs_roots);
    let resolver =
        ReferenceResolver::new(&index).with_redirect_hops(resolved.config.redirect_hops());

    println!("reference: {}", args.reference);
    if args.show_keys {
        for key in candidate_keys(&args.reference) {
            println!("candidate: {key}");
        }
    }
    match resolver.resolve(&args.reference) {
        Some(path) => println!("resolved: {}", normalize_path(&path)),
        None => println!("resolved: <unresolved>"),
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.diagnostics());
    }
    Ok(())
}

fn run_rewrite(runtime: &RuntimeOptions, args: RewriteArgs) -> Result<()> {
    let resolved = resolve_runtime_for(runtime)?;
    let Some(base_url) = resolved.docs_base_url.as_deref() else {
        bail!(
            "`rewrite` needs a documentation base URL.\nSet docs.base_url in {} or export JIRA2HTML_DOCS_BASE_URL",
            normalize_path(&resolved.paths.config_path)
        );
    };
    let index = DocumentIndex::build(&resolved.paths.docs_roots);
    let patterns = LinkPatterns::for_base_url(base_url)?;
    let resolver =
        ReferenceResolver::new(&index).with_redirect_hops(resolved.config.redirect_hops());
    let rewritten = LinkRewriter::new(&patterns, resolver).rewrite(&args.text);

    println!("{}", rewritten.text);
    println!("rewrite.resolved: {}", rewritten.stats.resolved);
    println!("rewrite.unresolved: {}", rewritten.stats.unresolved);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", resolved.diagnostics());
    }
    Ok(())
}

fn resolve_runtime_for(runtime: &RuntimeOptions) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        output_dir: runtime.output_dir.clone(),
        docs_roots: runtime.docs_roots.clone(),
    };

    let initial = resolve_runtime(&context, &overrides)?;
    let project_env = initial.paths.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_runtime(&context, &overrides)
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("warnings:");
    for warning in warnings {
        println!("  - {warning}");
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
