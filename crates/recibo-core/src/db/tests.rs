//! Database tests

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::*;
use crate::error::Error;
use crate::models::*;
use crate::payload::ReceiptPayload;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn ok_run() -> NewExtractionRun {
    NewExtractionRun {
        provider: "mock-agent".to_string(),
        model: Some("mock-rules-v1".to_string()),
        success: true,
        latency_ms: Some(12),
        error: None,
    }
}

/// Conversation + user message + attachment, returning (conversation, attachment)
fn upload(db: &Database, hash: &str) -> (Conversation, Attachment) {
    let conversation = db.create_conversation(None).unwrap();
    let message = db
        .create_message(&conversation.id, MessageRole::User, "[file] a.txt", None)
        .unwrap();
    let attachment = db
        .create_attachment(&NewAttachment {
            message_id: message.id,
            filename: "a.txt".to_string(),
            mime_type: "text/plain".to_string(),
            storage_path: "/tmp/a.txt".to_string(),
            content_hash: hash.to_string(),
        })
        .unwrap();
    (conversation, attachment)
}

fn receipt(conversation: &Conversation, attachment: &Attachment, vendor: &str) -> NewReceipt {
    NewReceipt {
        attachment_id: Some(attachment.id.clone()),
        conversation_id: conversation.id.clone(),
        vendor_name: vendor.to_string(),
        currency: "PEN".to_string(),
        ..Default::default()
    }
}

#[test]
fn test_in_memory_db() {
    let db = Database::in_memory().unwrap();
    let receipts = db.list_receipts(&ReceiptFilter::default()).unwrap();
    assert!(receipts.is_empty());
}

#[test]
fn test_money_cents_conversion() {
    assert_eq!(to_cents(dec("480.75")).unwrap(), 48075);
    assert_eq!(to_cents(dec("10")).unwrap(), 1000);
    assert_eq!(to_cents(dec("0.005")).unwrap(), 1);
    assert_eq!(from_cents(48075), dec("480.75"));

    match to_cents(dec("100000000000000000000")) {
        Err(Error::InvalidInput { code, .. }) => assert_eq!(code, "invalid_amount"),
        other => panic!("expected invalid_amount, got {:?}", other),
    }
}

fn assert_invalid_amount<T: std::fmt::Debug>(result: crate::error::Result<T>) {
    match result {
        Err(Error::InvalidInput { code, .. }) => assert_eq!(code, "invalid_amount"),
        other => panic!("expected invalid_amount, got {:?}", other),
    }
}

#[test]
fn test_out_of_range_amounts_are_rejected() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");
    let huge = dec("100000000000000000000");

    // Nothing is written when an amount cannot be stored exactly
    let new = NewReceipt {
        total: Some(huge),
        ..receipt(&c, &a, "Bodega")
    };
    assert_invalid_amount(db.create_receipt(&new, &[], &ok_run()));
    assert!(db.list_receipts(&ReceiptFilter::default()).unwrap().is_empty());

    let stored = db
        .create_receipt(
            &NewReceipt {
                total: Some(dec("18647120494230241.28")),
                ..receipt(&c, &a, "Bodega")
            },
            &[],
            &ok_run(),
        )
        .unwrap();

    assert_invalid_amount(db.list_receipts(&ReceiptFilter {
        min_total: Some(huge),
        ..Default::default()
    }));
    assert_invalid_amount(db.list_receipts(&ReceiptFilter {
        max_total: Some(huge),
        ..Default::default()
    }));
    assert_invalid_amount(db.search_receipts(huge, None));

    assert_invalid_amount(db.patch_receipt(
        &stored.id,
        &ReceiptPatch {
            subtotal: Some(huge),
            ..Default::default()
        },
    ));
    let unchanged = db.get_receipt(&stored.id).unwrap().unwrap();
    assert_eq!(unchanged.total, Some(dec("18647120494230241.28")));
    assert_eq!(unchanged.subtotal, None);
    assert_eq!(unchanged.status, ReceiptStatus::Processed);
}

#[test]
fn test_conversation_resume_creates_with_given_id() {
    let db = Database::in_memory().unwrap();

    let created = db.get_or_create_conversation(Some("conv-fixed")).unwrap();
    assert_eq!(created.id, "conv-fixed");

    let resumed = db.get_or_create_conversation(Some("conv-fixed")).unwrap();
    assert_eq!(resumed.id, created.id);

    let fresh = db.get_or_create_conversation(None).unwrap();
    assert_ne!(fresh.id, created.id);
}

#[test]
fn test_concurrent_first_messages_share_conversation() {
    let db = Database::in_memory().unwrap();

    let ids: Vec<String> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                scope.spawn(move || db.get_or_create_conversation(Some("conv-race")).unwrap().id)
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ids.iter().all(|id| id == "conv-race"));
    let conn = db.conn().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_messages_are_ordered_by_creation() {
    let db = Database::in_memory().unwrap();
    let conversation = db.create_conversation(None).unwrap();

    for i in 0..5 {
        let role = if i % 2 == 0 {
            MessageRole::User
        } else {
            MessageRole::Assistant
        };
        db.create_message(&conversation.id, role, &format!("m{}", i), None)
            .unwrap();
    }

    let messages = db.list_messages(&conversation.id).unwrap();
    let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["m0", "m1", "m2", "m3", "m4"]);
    assert_eq!(messages[1].role, MessageRole::Assistant);
}

#[test]
fn test_message_intent_persists() {
    let db = Database::in_memory().unwrap();
    let conversation = db.create_conversation(None).unwrap();
    db.create_message(
        &conversation.id,
        MessageRole::Assistant,
        "ok",
        Some(MessageIntent::AnalyzeReceiptDuplicate),
    )
    .unwrap();

    let messages = db.list_messages(&conversation.id).unwrap();
    assert_eq!(
        messages[0].intent,
        Some(MessageIntent::AnalyzeReceiptDuplicate)
    );
}

#[test]
fn test_create_receipt_with_items_and_run() {
    let db = Database::in_memory().unwrap();
    let (conversation, attachment) = upload(&db, "h1");

    let new = NewReceipt {
        receipt_number: Some("F001".to_string()),
        issue_date: Some(date("2026-02-23")),
        subtotal: Some(dec("407.42")),
        tax: Some(dec("73.33")),
        total: Some(dec("480.75")),
        confidence: Some(0.9),
        ..receipt(&conversation, &attachment, "TIENDA QA SAC")
    };
    let items = vec![
        NewReceiptItem {
            description: "Cafe".to_string(),
            quantity: dec("2"),
            unit_price: Some(dec("4.50")),
            line_total: Some(dec("9.00")),
        },
        NewReceiptItem {
            description: "Item".to_string(),
            quantity: Decimal::ONE,
            unit_price: None,
            line_total: None,
        },
    ];

    let created = db.create_receipt(&new, &items, &ok_run()).unwrap();
    assert_eq!(created.total, Some(dec("480.75")));
    assert_eq!(created.issue_date, Some(date("2026-02-23")));
    assert_eq!(created.status, ReceiptStatus::Processed);

    let loaded = db.get_receipt_with_items(&created.id).unwrap().unwrap();
    assert_eq!(loaded.items.len(), 2);
    assert_eq!(loaded.items[0].description, "Cafe");
    assert_eq!(loaded.items[0].quantity, dec("2"));
    assert_eq!(loaded.items[0].line_total, Some(dec("9.00")));
    assert_eq!(loaded.items[1].unit_price, None);

    let runs = db.list_extraction_runs(&created.id).unwrap();
    assert_eq!(runs.len(), 1);
    assert!(runs[0].success);
    assert_eq!(runs[0].latency_ms, Some(12));
}

#[test]
fn test_payload_round_trips() {
    let db = Database::in_memory().unwrap();
    let (conversation, attachment) = upload(&db, "h1");

    let new = NewReceipt {
        payload: ReceiptPayload::content_duplicate("orig-1"),
        status: ReceiptStatus::Duplicate,
        ..receipt(&conversation, &attachment, "X")
    };
    let created = db.create_receipt(&new, &[], &ok_run()).unwrap();

    assert_eq!(created.payload.duplicate_of(), Some("orig-1"));
    assert_eq!(created.status, ReceiptStatus::Duplicate);
}

#[test]
fn test_get_missing_receipt() {
    let db = Database::in_memory().unwrap();
    assert!(db.get_receipt("nope").unwrap().is_none());
    assert!(db.get_receipt_with_items("nope").unwrap().is_none());
}

#[test]
fn test_content_duplicate_source_picks_earliest() {
    let db = Database::in_memory().unwrap();

    let (c1, a1) = upload(&db, "same");
    let first = db
        .create_receipt(&receipt(&c1, &a1, "First"), &[], &ok_run())
        .unwrap();
    let (c2, a2) = upload(&db, "same");
    db.create_receipt(&receipt(&c2, &a2, "Second"), &[], &ok_run())
        .unwrap();

    let (_, a3) = upload(&db, "same");
    let source = db
        .find_content_duplicate_source("same", &a3.id)
        .unwrap()
        .unwrap();
    assert_eq!(source.id, first.id);

    assert!(db
        .find_content_duplicate_source("other", &a3.id)
        .unwrap()
        .is_none());
}

#[test]
fn test_content_duplicate_excludes_own_attachment() {
    let db = Database::in_memory().unwrap();
    let (c1, a1) = upload(&db, "solo");
    db.create_receipt(&receipt(&c1, &a1, "Solo"), &[], &ok_run())
        .unwrap();

    assert!(db
        .find_content_duplicate_source("solo", &a1.id)
        .unwrap()
        .is_none());
}

#[test]
fn test_business_duplicate_requires_all_keys() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");

    let keyed = |vendor: &str, total: Option<&str>| NewReceipt {
        receipt_number: Some("F001-10".to_string()),
        issue_date: Some(date("2026-02-23")),
        total: total.map(dec),
        ..receipt(&c, &a, vendor)
    };

    let original = db
        .create_receipt(&keyed("A", Some("100.10")), &[], &ok_run())
        .unwrap();
    let later = db
        .create_receipt(&keyed("B", Some("100.10")), &[], &ok_run())
        .unwrap();
    let different_total = db
        .create_receipt(&keyed("C", Some("100.11")), &[], &ok_run())
        .unwrap();
    let no_total = db.create_receipt(&keyed("D", None), &[], &ok_run()).unwrap();

    let candidate = db.find_business_duplicate(&later).unwrap().unwrap();
    assert_eq!(candidate.id, original.id);

    // The original matches the later one too; it is not its own candidate
    let reverse = db.find_business_duplicate(&original).unwrap().unwrap();
    assert_eq!(reverse.id, later.id);

    assert!(db.find_business_duplicate(&different_total).unwrap().is_none());
    assert!(db.find_business_duplicate(&no_total).unwrap().is_none());
}

#[test]
fn test_mark_duplicate_candidate() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");
    let r = db
        .create_receipt(&receipt(&c, &a, "A"), &[], &ok_run())
        .unwrap();

    let marked = db.mark_duplicate_candidate(&r.id, "orig-9").unwrap();
    assert_eq!(marked.status, ReceiptStatus::DuplicateCandidate);
    assert_eq!(marked.payload.duplicate_candidate_of(), Some("orig-9"));
}

#[test]
fn test_list_receipts_filters_and_order() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");

    for (vendor, total, day) in [
        ("Bodega Central", "50.00", "2026-01-10"),
        ("Farmacia Sol", "120.00", "2026-01-20"),
        ("bodega norte", "300.00", "2026-02-05"),
    ] {
        let new = NewReceipt {
            total: Some(dec(total)),
            issue_date: Some(date(day)),
            ..receipt(&c, &a, vendor)
        };
        db.create_receipt(&new, &[], &ok_run()).unwrap();
    }

    let all = db.list_receipts(&ReceiptFilter::default()).unwrap();
    let vendors: Vec<_> = all.iter().map(|r| r.receipt.vendor_name.as_str()).collect();
    assert_eq!(vendors, vec!["bodega norte", "Farmacia Sol", "Bodega Central"]);

    let bodegas = db
        .list_receipts(&ReceiptFilter {
            vendor: Some("BODEGA".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(bodegas.len(), 2);

    let ranged = db
        .list_receipts(&ReceiptFilter {
            min_total: Some(dec("100")),
            max_total: Some(dec("200")),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(ranged.len(), 1);
    assert_eq!(ranged[0].receipt.vendor_name, "Farmacia Sol");

    let january = db
        .list_receipts(&ReceiptFilter {
            from: Some(date("2026-01-01")),
            to: Some(date("2026-01-31")),
            limit: Some(1),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(january.len(), 1);
    assert_eq!(january[0].receipt.vendor_name, "Farmacia Sol");
}

#[test]
fn test_search_receipts_is_capped() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");

    for i in 0..25 {
        let new = NewReceipt {
            total: Some(Decimal::from(500 + i)),
            ..receipt(&c, &a, "Mayorista")
        };
        db.create_receipt(&new, &[], &ok_run()).unwrap();
    }

    let found = db.search_receipts(dec("500"), None).unwrap();
    assert_eq!(found.len(), MAX_SEARCH_LIMIT as usize);
    // Newest first
    assert_eq!(found[0].total, Some(dec("524")));

    let by_vendor = db.search_receipts(dec("0"), Some("otro")).unwrap();
    assert!(by_vendor.is_empty());
}

#[test]
fn test_patch_receipt() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");
    let r = db
        .create_receipt(&receipt(&c, &a, "Bodga"), &[], &ok_run())
        .unwrap();

    let patched = db
        .patch_receipt(
            &r.id,
            &ReceiptPatch {
                vendor_name: Some(" Bodega ".to_string()),
                total: Some(dec("42.5")),
                currency: Some("usd".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(patched.receipt.vendor_name, "Bodega");
    assert_eq!(patched.receipt.total, Some(dec("42.50")));
    assert_eq!(patched.receipt.currency, "USD");
    assert_eq!(patched.receipt.status, ReceiptStatus::ManuallyCorrected);

    let explicit = db
        .patch_receipt(
            &r.id,
            &ReceiptPatch {
                status: Some(ReceiptStatus::Processed),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(explicit.receipt.status, ReceiptStatus::Processed);
}

#[test]
fn test_patch_rejects_negative_amount_and_unknown_id() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");
    let r = db
        .create_receipt(&receipt(&c, &a, "Bodega"), &[], &ok_run())
        .unwrap();

    let negative = ReceiptPatch {
        tax: Some(dec("-1")),
        ..Default::default()
    };
    match db.patch_receipt(&r.id, &negative) {
        Err(Error::InvalidInput { code, .. }) => assert_eq!(code, "invalid_amount"),
        other => panic!("expected invalid_amount, got {:?}", other.map(|r| r.receipt.id)),
    }
    assert_eq!(
        db.get_receipt(&r.id).unwrap().unwrap().status,
        ReceiptStatus::Processed
    );

    assert!(matches!(
        db.patch_receipt("missing", &ReceiptPatch::default()),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_insights_listing_skips_null_totals_and_filters_dates() {
    let db = Database::in_memory().unwrap();
    let (c, a) = upload(&db, "h");

    for (total, day) in [
        (Some("10"), Some("2026-01-05")),
        (None, Some("2026-01-06")),
        (Some("20"), Some("2026-02-01")),
        (Some("30"), None),
    ] {
        let new = NewReceipt {
            total: total.map(dec),
            issue_date: day.map(date),
            ..receipt(&c, &a, "V")
        };
        db.create_receipt(&new, &[], &ok_run()).unwrap();
    }

    assert_eq!(db.list_receipts_for_insights(None, None).unwrap().len(), 3);

    let january = db
        .list_receipts_for_insights(Some(date("2026-01-01")), Some(date("2026-01-31")))
        .unwrap();
    assert_eq!(january.len(), 1);
    assert_eq!(january[0].total, Some(dec("10")));
}
