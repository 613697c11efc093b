//! Query tests
//!
//! Filtering and paging must behave the same on every backend.

mod common;

use action_ledger::audit::LOGS_PRUNE;
use action_ledger::chain::NewLogEntry;
use action_ledger::storage::{AuditFilter, LogFilter};
use action_ledger::Ledger;
use common::{append_at, memory_ledger, sqlite_ledger};

async fn seed(ledger: &Ledger) -> Result<(), Box<dyn std::error::Error>> {
    append_at(ledger, NewLogEntry::new("École", "enrol").user("Zoë"), 100).await;
    append_at(ledger, NewLogEntry::new("ÉCOLE", "enrol"), 200).await;
    append_at(ledger, NewLogEntry::new("Payroll", "export").details("Überstunden"), 300).await;
    ledger.audit().record(LOGS_PRUNE, "Zoë", "{}").await?;
    Ok(())
}

#[tokio::test]
async fn test_text_search_agrees_across_backends() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧪 Testing Unicode text search on both backends...");

    let (sqlite, _db) = sqlite_ledger().await;
    let memory = memory_ledger();
    seed(&sqlite).await?;
    seed(&memory).await?;

    for (text, expected) in [("école", 2), ("ZOË", 1), ("überstunden", 1), ("ecole", 0)] {
        let filter = LogFilter {
            text: Some(text.to_string()),
            ..Default::default()
        };
        assert_eq!(sqlite.count(&filter).await?, expected, "sqlite: {}", text);
        assert_eq!(memory.count(&filter).await?, expected, "memory: {}", text);

        let sqlite_ids: Vec<i64> = sqlite
            .query(&filter, 1, 10)
            .await?
            .entries
            .iter()
            .map(|e| e.id)
            .collect();
        let memory_ids: Vec<i64> = memory
            .query(&filter, 1, 10)
            .await?
            .entries
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(sqlite_ids, memory_ids, "{}", text);
    }

    let filter = AuditFilter {
        text: Some("zoË".to_string()),
        ..Default::default()
    };
    assert_eq!(sqlite.audits(&filter, 1, 10).await?.total, 1);
    assert_eq!(memory.audits(&filter, 1, 10).await?.total, 1);
    println!("✅ Both backends fold non-ASCII case");

    Ok(())
}

#[tokio::test]
async fn test_text_search_paging() -> Result<(), Box<dyn std::error::Error>> {
    let (ledger, _db) = sqlite_ledger().await;
    for ts in 1..=5 {
        append_at(&ledger, NewLogEntry::new("Straße", "walk"), ts).await;
    }
    append_at(&ledger, NewLogEntry::new("Avenue", "walk"), 6).await;

    let filter = LogFilter {
        text: Some("STRAßE".to_string()),
        ..Default::default()
    };
    let page = ledger.query(&filter, 2, 2).await?;
    assert_eq!(page.total, 5);
    let ids: Vec<i64> = page.entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 2]);

    let beyond = ledger.query(&filter, u32::MAX, 100).await?;
    assert_eq!(beyond.total, 5);
    assert!(beyond.entries.is_empty());
    Ok(())
}
