pub mod blueprint;
pub mod cli;
pub mod config;
pub mod data;
pub mod describe;
pub mod expr;
pub mod io_utils;
pub mod mapping;
pub mod matcher;
pub mod parser;
pub mod pipeline;
pub mod rules;
pub mod sql;
pub mod table;
pub mod transform;
pub mod validate;
pub mod vendor;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use serde::Serialize;

use crate::{
    blueprint::{Blueprint, BlueprintConfig},
    cli::{Cli, Commands, ReadArgs},
    config::EngineConfig,
    describe::HeuristicDescriber,
    mapping::ColumnMapping,
    parser::{ParseOptions, ParsedTable},
    pipeline::PipelineOptions,
    sql::IdentifierStyle,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("enrollment_mapper", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let config = EngineConfig::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Commands::Inspect(args) => handle_inspect(&args, &config),
        Commands::Template(args) => handle_template(&args, &config),
        Commands::Match(args) => handle_match(&args, &config),
        Commands::Validate(args) => handle_validate(&args, &config),
        Commands::Run(args) => handle_run(&args, &config),
        Commands::Sql(args) => handle_sql(&args, &config),
        Commands::Instantiate(args) => handle_instantiate(&args),
    }
}

/// Parser options from the config file with command-line flags on top.
fn parse_options(config: &EngineConfig, read: &ReadArgs) -> Result<ParseOptions> {
    let mut parser = config.parser.clone();
    if read.input_encoding.is_some() {
        parser.encoding = read.input_encoding.clone();
    }
    if read.sheet.is_some() {
        parser.sheet = read.sheet.clone();
    }
    parser.parse_options()
}

fn load_input(
    path: &Path,
    read: &ReadArgs,
    config: &EngineConfig,
    allow_header_only: bool,
) -> Result<ParsedTable> {
    let mut options = parse_options(config, read)?;
    options.allow_header_only = allow_header_only;
    if io_utils::is_spreadsheet_path(path) {
        info!("Reading workbook '{}'", path.display());
    } else {
        info!(
            "Reading '{}' with delimiter '{}'",
            path.display(),
            printable_delimiter(io_utils::resolve_input_delimiter(path, read.delimiter))
        );
    }
    let table = parser::load_table(path, read.delimiter, &options)?;
    info!(
        "Loaded {} row(s) across {} column(s) from {:?}",
        table.row_count(),
        table.headers.len(),
        path
    );
    Ok(table)
}

fn handle_inspect(args: &cli::InspectArgs, config: &EngineConfig) -> Result<()> {
    let table = load_input(&args.input, &args.read, config, true)?;
    let insights = describe::profile_table(&table, &HeuristicDescriber, 0);
    print!("{}", table::render_insights(&insights));
    if !table.rows.is_empty() {
        println!();
        print!("{}", table::render_rows(&table.headers, &table.rows, args.rows));
    }
    println!("{} row(s), {} column(s)", table.row_count(), table.headers.len());
    Ok(())
}

fn handle_template(args: &cli::TemplateArgs, config: &EngineConfig) -> Result<()> {
    let table = load_input(&args.input, &args.read, config, true)?;
    let column_mappings = describe::profile_table(&table, &HeuristicDescriber, 0)
        .into_iter()
        .map(|insight| {
            let mut mapping = ColumnMapping::unmapped(insight.header);
            mapping.data_type = insight.data_type;
            mapping.description = Some(insight.description);
            mapping
        })
        .collect::<Vec<_>>();
    let configuration = BlueprintConfig {
        column_mappings,
        ..BlueprintConfig::default()
    };
    let mut template = Blueprint::template(args.name.as_str(), configuration, Utc::now());
    template.description = args.description.clone();
    template.category = args.category.clone();
    template
        .validate()
        .with_context(|| format!("Generating template from {:?}", args.input))?;
    template
        .save(&args.output)
        .with_context(|| format!("Writing template to {:?}", args.output))?;
    info!(
        "Template '{}' with {} target field(s) written to {:?}",
        template.name,
        template.configuration.column_mappings.len(),
        args.output
    );
    Ok(())
}

fn handle_match(args: &cli::MatchArgs, config: &EngineConfig) -> Result<()> {
    let mut options = config.matcher;
    if let Some(min) = args.min_confidence {
        options.min_confidence = min;
    }
    let source = load_input(&args.source, &args.read, config, true)?;
    let mut report = match (&args.target, &args.blueprint) {
        (_, Some(path)) => {
            let blueprint =
                Blueprint::load(path).with_context(|| format!("Loading blueprint {path:?}"))?;
            matcher::resolve_saved(
                &source.headers,
                &blueprint.configuration.column_mappings,
                &options,
            )
        }
        (Some(path), None) => {
            let target = load_input(path, &args.read, config, true)?;
            matcher::match_headers(&source.headers, &target.headers, &options)
        }
        (None, None) => anyhow::bail!("Either --target or --blueprint is required"),
    };
    if !args.overrides.is_empty() {
        report.mappings =
            mapping::apply_overrides(&report.mappings, &args.overrides, &source.headers)
                .context("Applying mapping overrides")?;
        report.gaps.retain(|gap| {
            report
                .mappings
                .iter()
                .any(|m| m.target == gap.target && !m.is_mapped())
        });
        report.unused_sources = source
            .headers
            .iter()
            .filter(|s| !report.mappings.iter().any(|m| m.source.as_ref() == Some(*s)))
            .cloned()
            .collect();
    }

    print!("{}", table::render_match_report(&report));
    if !report.unused_sources.is_empty() {
        println!("unused source column(s): {}", report.unused_sources.join(", "));
    }
    info!(
        "Mapped {} of {} target field(s) at min confidence {}",
        report.mapped_count(),
        report.mappings.len(),
        options.min_confidence
    );
    if let Some(path) = &args.output {
        write_structured(path, &report.mappings)
            .with_context(|| format!("Writing mappings to {path:?}"))?;
        info!("Mappings written to {path:?}");
    }
    Ok(())
}

fn handle_validate(args: &cli::ValidateArgs, config: &EngineConfig) -> Result<()> {
    let blueprint = Blueprint::load(&args.blueprint)?;
    let table = load_input(&args.input, &args.read, config, false)?;
    let (_, _, validation) =
        pipeline::map_and_validate(&table, config, &blueprint.configuration, &args.overrides)
            .with_context(|| format!("Validating {:?}", args.input))?;

    if validation.summary.diagnostic_count > 0 {
        print!("{}", table::render_diagnostics(&validation, args.limit));
    }
    println!(
        "{} row(s): {} valid, {} with errors, {} diagnostic(s)",
        validation.summary.total_rows,
        validation.summary.valid_rows,
        validation.summary.error_rows,
        validation.summary.diagnostic_count
    );
    if let Some(path) = &args.report {
        write_structured(path, &validation)
            .with_context(|| format!("Writing validation report to {path:?}"))?;
        info!("Validation report written to {path:?}");
    }
    Ok(())
}

fn handle_run(args: &cli::RunArgs, config: &EngineConfig) -> Result<()> {
    let blueprint = Blueprint::load(&args.blueprint)?;
    let table = load_input(&args.input, &args.read, config, false)?;
    let options = PipelineOptions {
        overrides: args.overrides.clone(),
        sql_table: args.table.clone(),
    };
    let report = pipeline::run_pipeline(&table, config, &blueprint.configuration, &options)
        .with_context(|| format!("Running blueprint '{}'", blueprint.name))?;

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Creating output directory {:?}", args.output_dir))?;
    write_structured(&args.output_dir.join("report.json"), &report)?;
    for output in &report.vendor_outputs {
        let path = args.output_dir.join(output.default_file_name());
        output.write(Some(&path))?;
        info!(
            "{}: {} row(s) written to {:?}, {} error(s), {} invalid row(s) skipped",
            output.vendor_name,
            output.summary.successful_rows,
            path,
            output.summary.error_rows,
            output.summary.skipped_rows
        );
    }
    if let (Some(table_name), Some(sql)) = (&args.table, &report.sql) {
        if sql.is_empty() {
            warn!("No valid rows; SQL for '{table_name}' not written");
        } else {
            let path = args.output_dir.join(format!("{table_name}.sql"));
            io_utils::write_text(Some(&path), &format!("{}\n", sql.statements))?;
            info!("SQL written to {path:?}");
        }
    }
    println!(
        "{} row(s): {} valid, {} with errors; {} vendor output(s) in {:?}",
        report.validation.summary.total_rows,
        report.validation.summary.valid_rows,
        report.validation.summary.error_rows,
        report.vendor_outputs.len(),
        args.output_dir
    );
    Ok(())
}

fn handle_sql(args: &cli::SqlArgs, config: &EngineConfig) -> Result<()> {
    let table = load_input(&args.input, &args.read, config, false)?;
    let mut options = config.sql.options(args.table.as_str());
    if args.no_audit_columns {
        options.audit_columns = false;
    }
    if args.quote_identifiers {
        options.identifiers = IdentifierStyle::Quoted;
    }
    let output = sql::generate(&table.rows, &options);
    debug!("Flagged identifiers: {:?}", output.flagged_identifiers);
    io_utils::write_text(args.output.as_deref(), &format!("{}\n", output.statements))?;
    info!(
        "Rendered {} INSERT statement(s) for table '{}'",
        table.row_count(),
        options.table
    );
    Ok(())
}

fn handle_instantiate(args: &cli::InstantiateArgs) -> Result<()> {
    let template = Blueprint::load(&args.blueprint)?;
    let instance = template
        .instantiate(args.name.as_deref(), &args.client, &args.vendor, Utc::now())
        .with_context(|| format!("Instantiating {:?}", args.blueprint))?;
    instance.validate()?;
    instance
        .save(&args.output)
        .with_context(|| format!("Writing instance to {:?}", args.output))?;
    info!("Instance '{}' written to {:?}", instance.name, args.output);
    Ok(())
}

/// JSON for `.json` paths, YAML otherwise.
fn write_structured<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let rendered = if io_utils::extension(path).as_deref() == Some("json") {
        let mut json = serde_json::to_string_pretty(value)?;
        json.push('\n');
        json
    } else {
        serde_yaml::to_string(value)?
    };
    io_utils::write_text(Some(path), &rendered)
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
