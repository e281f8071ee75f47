use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

const HEADER: &str = "uid,name,email,phone,status,grade,fee_rate,is_grade_manual,monthly_limit,used_amount,last_month_payment_amount";

fn users_csv(rows: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{HEADER}").unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    file
}

#[test]
fn test_quote_prints_breakdown() {
    Command::new(cargo_bin!("dealwire"))
        .args([
            "quote",
            "--amount",
            "1000000",
            "--fee-rate",
            "5.5",
            "--discount-percent",
            "10",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""feeAmount": "55000""#))
        .stdout(predicate::str::contains(r#""totalAmount": "1055000""#))
        .stdout(predicate::str::contains(r#""discountAmount": "5500""#))
        .stdout(predicate::str::contains(r#""finalAmount": "1049500""#));
}

#[test]
fn test_quote_rejects_bad_inputs() {
    Command::new(cargo_bin!("dealwire"))
        .args(["quote", "--amount", "1000", "--fee-rate", "120"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Fee rate must be between 0 and 100"));

    Command::new(cargo_bin!("dealwire"))
        .args(["quote", "--amount", "10.5", "--fee-rate", "4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("whole number"));
}

#[test]
fn test_rollover_promotes_and_resets() {
    let input = users_csv(&[
        "u1,Kim,kim@example.com,01012345678,active,basic,4.0,false,10000000,12000000,0",
        "u2,Lee,,01000000000,active,b2b,3.0,true,100000000,500,0",
    ]);

    Command::new(cargo_bin!("dealwire"))
        .arg("rollover")
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(HEADER))
        .stdout(predicate::str::contains(
            "u1,Kim,kim@example.com,01012345678,active,platinum,3.5,false,30000000,0,12000000",
        ))
        .stdout(predicate::str::contains(",b2b,"))
        .stdout(predicate::str::contains(",true,100000000,0,500"));
}

#[test]
fn test_rollover_skips_unreadable_rows() {
    let input = users_csv(&[
        "u1,Kim,,01012345678,active,basic,4.0,false,10000000,0,0",
        "u2,Lee,,01000000000,active,diamond,3.0,false,1,0,0",
    ]);

    Command::new(cargo_bin!("dealwire"))
        .arg("rollover")
        .arg(input.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("u1,Kim"))
        .stdout(predicate::str::contains("u2,").not())
        .stderr(predicate::str::contains("Skipping unreadable user row"));
}

#[test]
fn test_rollover_missing_file_fails() {
    Command::new(cargo_bin!("dealwire"))
        .args(["rollover", "/nonexistent/users.csv"])
        .assert()
        .failure();
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_db_path_without_storage_feature_falls_back() {
    let input = users_csv(&["u1,Kim,,01012345678,active,basic,4.0,false,10000000,0,0"]);
    let dir = tempfile::tempdir().unwrap();

    Command::new(cargo_bin!("dealwire"))
        .arg("rollover")
        .arg(input.path())
        .arg("--db-path")
        .arg(dir.path().join("db"))
        .assert()
        .success()
        .stdout(predicate::str::contains("u1,Kim"))
        .stderr(predicate::str::contains("using in-memory storage"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rollover_state_survives_restarts() {
    let input = users_csv(&["u1,Kim,,01012345678,active,basic,4.0,false,10000000,12000000,0"]);
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("db");

    Command::new(cargo_bin!("dealwire"))
        .arg("rollover")
        .arg(input.path())
        .arg("--db-path")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains(",platinum,3.5,false,30000000,0,12000000"));

    // The stored record wins over the CSV; a month with no payments demotes.
    Command::new(cargo_bin!("dealwire"))
        .arg("rollover")
        .arg(input.path())
        .arg("--db-path")
        .arg(&db)
        .assert()
        .success()
        .stdout(predicate::str::contains(",basic,4.0,false,10000000,0,0"))
        .stderr(predicate::str::contains("User already stored"));
}
