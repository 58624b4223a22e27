#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use enrollment_mapper::parser::{self, ParseOptions, ParsedTable};
use tempfile::{TempDir, tempdir};

pub const CENSUS_CSV: &str = "\
Emp_ID,FName,LName,E-mail,DOB,Dept
E100,Ana,O'Brien,ana@example.com,01/02/1985,Sales
E101,Bo,Lee,,1990-07-15,
E102,Cy,Diaz,cy@example.com,03/04/1979,
";

pub const MASTER_CSV: &str = "Employee ID,First Name,Last Name,Email,Birth Date,Department\n";

/// Template blueprint over the master fields with two vendors.
pub const BLUEPRINT_YAML: &str = r#"
id: tpl-standard
name: Standard Enrollment
version: 2
configuration:
  column_mappings:
    - target: Employee ID
      source: Emp_ID
      required: true
    - target: First Name
    - target: Last Name
    - target: Email
    - target: Birth Date
      source: DOB
      data_type: date
      transformation: "date:%Y-%m-%d"
    - target: Department
  validation_rules:
    - field: Email
      type: required
    - field: Email
      type: format
      format: email
  vendor_outputs:
    - vendor_id: carrier
      vendor_name: Carrier Co
      required_fields: [Department]
      fields:
        - field: Employee ID
          output: member_id
        - field: Last Name
          transform: uppercase
        - field: Birth Date
        - field: Line
          transform: "const:MEDICAL"
    - vendor_id: dental
      output_format: json
      fields:
        - field: Employee ID
        - field: Email
"#;

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.temp_dir.path().join(name)).expect("read workspace file")
    }
}

/// Parses CSV text the way the CLI would.
pub fn parse_csv(contents: &str) -> ParsedTable {
    parser::parse_bytes(
        contents.as_bytes(),
        parser::FileFormat::Delimited { delimiter: b',' },
        &ParseOptions::default(),
    )
    .expect("parse csv")
}

pub fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}
