mod common;

use enrollment_mapper::{
    blueprint::Blueprint,
    config::EngineConfig,
    data::Value,
    pipeline::{self, PipelineOptions},
    rules::RuleTag,
    vendor::VendorError,
};

use common::{BLUEPRINT_YAML, CENSUS_CSV, parse_csv};

fn blueprint() -> Blueprint {
    serde_yaml::from_str(BLUEPRINT_YAML).expect("blueprint yaml")
}

#[test]
fn census_flows_through_every_stage() {
    let table = parse_csv(CENSUS_CSV);
    let blueprint = blueprint();
    blueprint.validate().unwrap();
    let options = PipelineOptions {
        overrides: Vec::new(),
        sql_table: Some("enrollment".to_string()),
    };
    let report =
        pipeline::run_pipeline(&table, &EngineConfig::default(), &blueprint.configuration, &options)
            .unwrap();

    let sources = report
        .matching
        .mappings
        .iter()
        .map(|m| m.source.as_deref())
        .collect::<Vec<_>>();
    assert_eq!(
        sources,
        vec![
            Some("Emp_ID"),
            Some("FName"),
            Some("LName"),
            Some("E-mail"),
            Some("DOB"),
            Some("Dept"),
        ]
    );
    assert_eq!(
        report.mapped.rows[0].value("Birth Date"),
        &Value::text("1985-01-02")
    );

    assert_eq!(report.validation.summary.valid_rows, 2);
    let row_two = &report.validation.results[1];
    assert_eq!(row_two.diagnostics.len(), 1);
    assert_eq!(row_two.diagnostics[0].rule, RuleTag::Required);

    let carrier = &report.vendor_outputs[0];
    assert_eq!(carrier.rows.len(), 1);
    assert_eq!(carrier.skipped_invalid, vec![1]);
    assert_eq!(
        carrier.errors,
        vec![VendorError::FieldMissing {
            row_index: 2,
            field: "Department".to_string(),
        }]
    );
    assert_eq!(
        carrier.render().unwrap(),
        "member_id,Last Name,Birth Date,Line\nE100,O'BRIEN,1985-01-02,MEDICAL\n"
    );

    let dental = &report.vendor_outputs[1];
    assert_eq!(dental.rows.len(), 2);
    assert!(dental.errors.is_empty());

    let sql = report.sql.as_ref().unwrap();
    let inserts = sql
        .statements
        .lines()
        .filter(|line| line.starts_with("INSERT INTO enrollment"))
        .count();
    assert_eq!(inserts, 2);
    assert!(sql.statements.contains("'O''Brien'"));
    assert!(!sql.statements.contains("'E101'"));
    assert!(sql.flagged_identifiers.contains(&"Employee ID".to_string()));
}

#[test]
fn failed_transformations_invalidate_the_row() {
    let table = parse_csv(
        "Emp_ID,FName,LName,E-mail,DOB,Dept\nE1,A,B,a@b.co,someday,Ops\nE2,C,D,c@d.co,2001-02-03,Ops\n",
    );
    let blueprint = blueprint();
    let (_, mapped, validation) = pipeline::map_and_validate(
        &table,
        &EngineConfig::default(),
        &blueprint.configuration,
        &[],
    )
    .unwrap();

    assert_eq!(mapped.issues.len(), 1);
    assert_eq!(mapped.issues[0].row_index, 0);
    assert!(!validation.is_valid(0));
    assert!(validation.is_valid(1));
    assert!(
        validation.results[0]
            .diagnostics
            .iter()
            .any(|d| d.field == "Birth Date" && d.rule == RuleTag::Transform)
    );
}

#[test]
fn overrides_redirect_a_mapping() {
    let table = parse_csv(CENSUS_CSV);
    let blueprint = blueprint();
    let overrides = vec!["Email=".parse().unwrap()];
    let (matching, _, validation) = pipeline::map_and_validate(
        &table,
        &EngineConfig::default(),
        &blueprint.configuration,
        &overrides,
    )
    .unwrap();
    assert!(!matching.mappings[3].is_mapped());
    assert_eq!(validation.summary.valid_rows, 0);
}

#[test]
fn unknown_override_source_is_an_error() {
    let table = parse_csv(CENSUS_CSV);
    let overrides = vec!["Email=Nope".parse().unwrap()];
    let result = pipeline::map_and_validate(
        &table,
        &EngineConfig::default(),
        &blueprint().configuration,
        &overrides,
    );
    assert!(result.is_err());
}

#[test]
fn many_failed_transformations_are_recorded_in_one_pass() {
    let mut csv = String::from("Emp_ID,FName,LName,E-mail,DOB,Dept\n");
    for idx in 0..5_000 {
        csv.push_str(&format!("E{idx},A,B,a@b.co,not a date,Ops\n"));
    }
    let table = parse_csv(&csv);
    let (_, mapped, validation) = pipeline::map_and_validate(
        &table,
        &EngineConfig::default(),
        &blueprint().configuration,
        &[],
    )
    .unwrap();

    assert_eq!(mapped.issues.len(), 5_000);
    assert_eq!(validation.summary.valid_rows, 0);
    assert_eq!(validation.summary.error_rows, 5_000);
    assert_eq!(validation.summary.diagnostic_count, 5_000);
}
