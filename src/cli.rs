use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::mapping::MappingOverride;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Map, validate and export insurance enrollment files",
    long_about = None
)]
pub struct Cli {
    /// Engine configuration file (YAML); defaults apply when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse a file and show its columns, inferred types and a preview
    Inspect(InspectArgs),
    /// Generate a template blueprint from a master file's headers
    Template(TemplateArgs),
    /// Propose a column mapping from a source file onto target fields
    Match(MatchArgs),
    /// Map a file through a blueprint and validate every row
    Validate(ValidateArgs),
    /// Run the full pipeline: validation report, vendor files and SQL
    Run(RunArgs),
    /// Render CREATE TABLE and INSERT statements for a file
    Sql(SqlArgs),
    /// Derive a client/vendor instance from a template blueprint
    Instantiate(InstantiateArgs),
}

/// Options shared by every command that parses a data file.
#[derive(Debug, Clone, Default, Args)]
pub struct ReadArgs {
    /// Field delimiter for delimited input (defaults by extension)
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding for delimited input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Worksheet to read from an .xlsx/.xls/.ods file (defaults to the first)
    #[arg(long)]
    pub sheet: Option<String>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Input file to inspect (`-` reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of rows to preview (0 shows all)
    #[arg(long = "rows", default_value_t = 10)]
    pub rows: usize,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct TemplateArgs {
    /// Master file whose headers define the target fields
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination blueprint (.yaml or .json)
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Template name
    #[arg(long)]
    pub name: String,
    /// Optional template description
    #[arg(long)]
    pub description: Option<String>,
    /// Optional template category
    #[arg(long)]
    pub category: Option<String>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    /// Client file whose headers are matched
    #[arg(short = 's', long = "source")]
    pub source: PathBuf,
    /// Master file whose headers are the target fields
    #[arg(
        short = 't',
        long = "target",
        conflicts_with = "blueprint",
        required_unless_present = "blueprint"
    )]
    pub target: Option<PathBuf>,
    /// Blueprint whose saved mappings are reused
    #[arg(short = 'b', long = "blueprint")]
    pub blueprint: Option<PathBuf>,
    /// Write the proposed mappings here (.yaml or .json)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Minimum confidence (0-100) for an automatic assignment
    #[arg(long = "min-confidence", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub min_confidence: Option<u8>,
    /// Manual correction TARGET=SOURCE (`TARGET=` leaves it unmapped); repeatable
    #[arg(long = "override", value_name = "TARGET=SOURCE")]
    pub overrides: Vec<MappingOverride>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Enrollment file to validate
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Blueprint carrying mappings and validation rules
    #[arg(short = 'b', long = "blueprint")]
    pub blueprint: PathBuf,
    /// Write the full validation report as JSON
    #[arg(long = "report")]
    pub report: Option<PathBuf>,
    /// Manual mapping correction TARGET=SOURCE; repeatable
    #[arg(long = "override", value_name = "TARGET=SOURCE")]
    pub overrides: Vec<MappingOverride>,
    /// Maximum diagnostics to print (0 prints all)
    #[arg(long = "limit", default_value_t = 50)]
    pub limit: usize,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Enrollment file to process
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Blueprint carrying mappings, rules and vendor outputs
    #[arg(short = 'b', long = "blueprint")]
    pub blueprint: PathBuf,
    /// Directory that receives report.json, vendor files and SQL
    #[arg(short = 'o', long = "output-dir")]
    pub output_dir: PathBuf,
    /// Render SQL for the valid rows into this table
    #[arg(long)]
    pub table: Option<String>,
    /// Manual mapping correction TARGET=SOURCE; repeatable
    #[arg(long = "override", value_name = "TARGET=SOURCE")]
    pub overrides: Vec<MappingOverride>,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct SqlArgs {
    /// Input file to render
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Destination table name
    #[arg(long)]
    pub table: String,
    /// Output .sql file (defaults to stdout)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Leave out the created_at/updated_at audit columns
    #[arg(long = "no-audit-columns")]
    pub no_audit_columns: bool,
    /// Wrap every identifier in double quotes
    #[arg(long = "quote-identifiers")]
    pub quote_identifiers: bool,
    #[command(flatten)]
    pub read: ReadArgs,
}

#[derive(Debug, Args)]
pub struct InstantiateArgs {
    /// Template blueprint to copy
    #[arg(short = 'b', long = "blueprint")]
    pub blueprint: PathBuf,
    /// Client the instance is bound to
    #[arg(long)]
    pub client: String,
    /// Vendor the instance is bound to
    #[arg(long)]
    pub vendor: String,
    /// Destination blueprint (.yaml or .json)
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Instance name (defaults to "<template> (<client> / <vendor>)")
    #[arg(long)]
    pub name: Option<String>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_resolve() {
        assert_eq!(parse_delimiter("tab"), Ok(b'\t'));
        assert_eq!(parse_delimiter("pipe"), Ok(b'|'));
        assert_eq!(parse_delimiter(":"), Ok(b':'));
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
        assert!(parse_delimiter("§").is_err());
    }

    #[test]
    fn match_requires_target_or_blueprint() {
        assert!(Cli::try_parse_from(["enrollment-mapper", "match", "-s", "a.csv"]).is_err());
        assert!(
            Cli::try_parse_from([
                "enrollment-mapper",
                "match",
                "-s",
                "a.csv",
                "-t",
                "b.csv",
                "-b",
                "c.yaml"
            ])
            .is_err()
        );
        let cli = Cli::try_parse_from([
            "enrollment-mapper",
            "match",
            "-s",
            "a.csv",
            "-t",
            "b.csv",
            "--override",
            "Email=Mail",
            "--min-confidence",
            "70",
        ])
        .unwrap();
        match cli.command {
            Commands::Match(args) => {
                assert_eq!(args.min_confidence, Some(70));
                assert_eq!(args.overrides[0].target, "Email");
                assert_eq!(args.overrides[0].source.as_deref(), Some("Mail"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
