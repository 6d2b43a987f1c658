#![cfg(feature = "storage-rocksdb")]

mod common;

use assert_cmd::cargo_bin;
use common::{harness_with, open_account, start};
use credit_ledger::domain::credit::CreditRequest;
use credit_ledger::domain::money::Balance;
use credit_ledger::domain::schedule::InstallmentStatus;
use credit_ledger::infrastructure::rocksdb::RocksDBStore;
use rust_decimal_macros::dec;
use std::io::Write;
use std::process::Command;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::test]
async fn test_ledger_state_survives_reopen() {
    let dir = tempdir().unwrap();

    let (account, credit_id) = {
        let h = harness_with(Arc::new(RocksDBStore::open(dir.path()).unwrap()));
        let account = open_account(&h.ledger, 1, dec!(75.25)).await;
        let (credit_id, _) = h
            .credits
            .issue(CreditRequest {
                user: 1,
                principal: dec!(1200),
                term_months: 12,
                rate: Some(dec!(12)),
            })
            .await
            .unwrap();
        (account, credit_id)
    };

    let h = harness_with(Arc::new(RocksDBStore::open(dir.path()).unwrap()));
    assert_eq!(
        h.ledger.account(account, 1).await.unwrap().balance,
        Balance::new(dec!(75.25))
    );
    let installments = h.credits.for_credit(credit_id).await.unwrap();
    assert_eq!(installments.len(), 12);
    assert!(installments.windows(2).all(|w| w[0].due_date < w[1].due_date));

    let report = h.collector.run_once(start()).await.unwrap();
    assert_eq!(report.paid, 1);
    let installments = h.credits.for_credit(credit_id).await.unwrap();
    assert_eq!(installments[0].status, InstallmentStatus::Paid);

    // New ids continue after the persisted sequence.
    let next = open_account(&h.ledger, 2, dec!(0)).await;
    assert!(next > account);
}

#[test]
fn test_rocksdb_persistence_across_runs() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    // 1. First run: open an account and take a credit
    let mut csv1 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv1, "op,user,account,target,amount,term,rate").unwrap();
    writeln!(csv1, "open,1,,,100.00,,").unwrap();
    writeln!(csv1, "credit,1,,,1200,12,12").unwrap();

    let mut cmd1 = Command::new(cargo_bin!("credit-ledger"));
    cmd1.args(["--now", "2026-01-15T00:00:00Z"])
        .arg("--db-path")
        .arg(&db_path)
        .arg("apply")
        .arg(csv1.path());

    let output1 = cmd1.output().expect("Failed to execute command");
    assert!(output1.status.success());
    let stdout1 = String::from_utf8_lossy(&output1.stdout);
    assert!(stdout1.contains("1,1,CHECKING,RUB,100.00,true"));
    assert!(stdout1.contains("2,1,CREDIT,RUB,1200,true"));

    // 2. Second run: sweep against the same DB path
    let mut cmd2 = Command::new(cargo_bin!("credit-ledger"));
    cmd2.arg("--db-path")
        .arg(&db_path)
        .args(["sweep", "--at", "2026-01-15T00:00:00Z"]);

    let output2 = cmd2.output().expect("Failed to execute command");
    assert!(output2.status.success());
    let stdout2 = String::from_utf8_lossy(&output2.stdout);
    assert!(stdout2.contains(r#""paid":1"#));

    // 3. Third run: the collected payment is visible, nothing is due twice
    let mut csv3 = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv3, "op,user,account,target,amount,term,rate").unwrap();
    writeln!(csv3, "deposit,1,1,,0.50,,").unwrap();

    let mut cmd3 = Command::new(cargo_bin!("credit-ledger"));
    cmd3.arg("--db-path")
        .arg(&db_path)
        .arg("apply")
        .arg(csv3.path())
        .args(["--sweep-at", "2026-01-15T00:00:00Z"]);

    let output3 = cmd3.output().expect("Failed to execute command");
    assert!(output3.status.success());
    let stdout3 = String::from_utf8_lossy(&output3.stdout);
    assert!(stdout3.contains("1,1,CHECKING,RUB,100.50,true"));
    assert!(stdout3.contains("2,1,CREDIT,RUB,1093.38,true"));
}
