use assert_cmd::Command;
use predicates::prelude::*;

const INPUT_XML: &str = r#"<records>
  <record>
    <Alternative_number>
      <alternative_number.type>CALM RecordID</alternative_number.type>
      <alternative_number>C1</alternative_number>
    </Alternative_number>
    <record_type><value lang="neutral">ITEM</value></record_type>
    <Title><title>Minutes</title></Title>
  </record>
</records>"#;

#[test]
fn run_cli_happy_flow_prints_a_report() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("tree.xml");
    std::fs::write(&input, INPUT_XML).expect("write input");

    let config = dir.path().join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "output_dir: {out}\nregister:\n  path: {register}\n",
            out = dir.path().join("delivery").display(),
            register = dir.path().join("register.json").display(),
        ),
    )
    .expect("write config");

    let mut cmd = Command::cargo_bin("ctd-pipeline").expect("binary exists");
    cmd.arg("run")
        .arg("--input")
        .arg(&input)
        .arg("--config")
        .arg(&config);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Pipeline complete").and(predicate::str::contains("delivered: 1")));

    assert!(dir.path().join("delivery").join("tree.tar.gz").exists());
}

#[test]
fn run_cli_fails_on_missing_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let input = dir.path().join("tree.xml");
    std::fs::write(&input, INPUT_XML).expect("write input");

    let mut cmd = Command::cargo_bin("ctd-pipeline").expect("binary exists");
    cmd.arg("run")
        .arg("--input")
        .arg(&input)
        .arg("--config")
        .arg(dir.path().join("missing.yaml"));

    cmd.assert().failure();
}
