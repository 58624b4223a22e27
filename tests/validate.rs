use enrollment_mapper::{
    data::{DataType, Row, Value},
    mapping::ColumnMapping,
    rules::{Bound, NamedFormat, RuleTag, ValidationRule},
    validate::ValidationEngine,
};

fn email_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::required("Email"),
        ValidationRule::named_format("Email", NamedFormat::Email),
    ]
}

#[test]
fn empty_required_field_reports_once() {
    let engine = ValidationEngine::new(&email_rules(), &[]).unwrap();
    let report = engine.validate(&[Row::new().with("Email", Value::Null)]);

    let diagnostics = &report.results[0].diagnostics;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].rule, RuleTag::Required);
    assert_eq!(diagnostics[0].field, "Email");
    assert_eq!(diagnostics[0].message, "Email is required");
    assert!(!report.results[0].valid);
}

#[test]
fn invalid_email_reports_format() {
    let engine = ValidationEngine::new(&email_rules(), &[]).unwrap();
    let report = engine.validate(&[
        Row::new().with("Email", "ana@example.com"),
        Row::new().with("Email", "cy@example"),
    ]);
    assert!(report.results[0].valid);
    let diagnostics = &report.results[1].diagnostics;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].rule, RuleTag::Format);
    assert_eq!(diagnostics[0].message, "Email is not a valid email address");
    assert_eq!(report.summary.valid_rows, 1);
    assert_eq!(report.summary.error_rows, 1);
    assert_eq!(report.summary.diagnostic_count, 1);
}

#[test]
fn validation_is_idempotent() {
    let mut age = ColumnMapping::unmapped("Age");
    age.data_type = DataType::Number;
    let rules = vec![
        ValidationRule::required("Email"),
        ValidationRule::range("Age", Some(Bound::Number(18.0)), Some(Bound::Number(70.0))),
        ValidationRule::one_of("Plan", ["PPO", "HMO"]),
    ];
    let engine = ValidationEngine::new(&rules, &[age]).unwrap();
    let rows = vec![
        Row::new().with("Email", "a@b.co").with("Age", "30").with("Plan", "PPO"),
        Row::new().with("Email", Value::Null).with("Age", "12").with("Plan", "EPO"),
        Row::new().with("Email", "c@d.co").with("Age", "old").with("Plan", "HMO"),
    ];

    let first = engine.validate(&rows);
    let second = engine.validate(&rows);
    assert_eq!(first, second);
    assert_eq!(first.summary.valid_rows, 1);

    let tags = first.results[1]
        .diagnostics
        .iter()
        .map(|d| (d.field.as_str(), d.rule))
        .collect::<Vec<_>>();
    assert_eq!(
        tags,
        vec![
            ("Age", RuleTag::Range),
            ("Email", RuleTag::Required),
            ("Plan", RuleTag::Custom),
        ]
    );
    assert_eq!(first.results[2].diagnostics.len(), 1);
    assert_eq!(first.results[2].diagnostics[0].rule, RuleTag::Format);
}

#[test]
fn required_mapping_flag_adds_a_required_rule() {
    let mut id = ColumnMapping::unmapped("Employee ID");
    id.required = true;
    let engine = ValidationEngine::new(&[], &[id]).unwrap();
    let report = engine.validate(&[Row::new().with("Employee ID", Value::Null)]);
    assert_eq!(report.results[0].diagnostics[0].rule, RuleTag::Required);
}

#[test]
fn rules_load_from_yaml() {
    let rules: Vec<ValidationRule> = serde_yaml::from_str(
        r#"
- field: Email
  type: required
- field: Email
  type: format
  format: email
- field: Coverage Start
  type: custom
  compare: ">="
  other_field: Hire Date
  message: coverage cannot start before hire
"#,
    )
    .unwrap();
    let mut start = ColumnMapping::unmapped("Coverage Start");
    start.data_type = DataType::Date;
    let mut hire = ColumnMapping::unmapped("Hire Date");
    hire.data_type = DataType::Date;
    let engine = ValidationEngine::new(&rules, &[start, hire]).unwrap();

    let report = engine.validate(&[
        Row::new()
            .with("Email", "a@b.co")
            .with("Coverage Start", "2024-01-01")
            .with("Hire Date", "2024-03-01"),
    ]);
    let diagnostics = &report.results[0].diagnostics;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].field, "Coverage Start");
    assert_eq!(diagnostics[0].rule, RuleTag::Custom);
    assert_eq!(diagnostics[0].message, "coverage cannot start before hire");
}

#[test]
fn invalid_pattern_is_rejected_at_compile_time() {
    let rules = vec![ValidationRule::pattern("Zip", "(unclosed")];
    assert!(ValidationEngine::new(&rules, &[]).is_err());
}

#[test]
fn declared_checks_are_never_dropped() {
    let foreign_key = serde_yaml::from_str::<Vec<ValidationRule>>(
        r#"
- field: Email
  type: required
  pattern: '^x$'
"#,
    );
    assert!(foreign_key.is_err());

    let rules: Vec<ValidationRule> = serde_yaml::from_str(
        r#"
- field: Tier
  type: custom
  one_of: [EE, FAM]
  expression: "value == 'EE'"
"#,
    )
    .unwrap();
    let err = ValidationEngine::new(&rules, &[])
        .err()
        .expect("rule with two checks is rejected");
    assert!(err.to_string().contains("one_of, expression"), "{err}");
}
