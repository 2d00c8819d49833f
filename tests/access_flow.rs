//! Integration tests for the access ledger through the dispatch boundary.

mod common;

use common::{TestHarness, admin_request, member_request, owner_request};
use wardend::dispatch::{Command, Payload};
use wardend::error::OpError;
use wardend::ledger::Usability;

#[tokio::test]
async fn grant_then_consume_to_the_quota_boundary() {
    let h = TestHarness::new().await;

    // Admin grants "basic" (quota 10).
    let payload = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::Grant {
            user_id: "u1".to_string(),
            tier_id: "basic".to_string(),
        }))
        .await
        .expect("grant");
    assert!(matches!(payload, Payload::Granted { ref tier_id, .. } if tier_id == "basic"));

    // One protected file through the full pipeline (passthrough path).
    let payload = h
        .dispatcher
        .dispatch(member_request("u1", Command::Protect {
            file_name: "notes.txt".to_string(),
            content: b"hello".to_vec(),
            preset: None,
        }))
        .await
        .expect("protect");
    match payload {
        Payload::Protected {
            preset,
            files_used_this_period,
            output,
            ..
        } => {
            assert_eq!(preset, "None");
            assert_eq!(files_used_this_period, 1);
            assert!(output.ends_with(b"hello"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // Walk the ledger to the boundary: consumptions 2..=10 pass.
    for _ in 2..=10 {
        assert!(h.warden.ledger.can_consume("u1").allowed());
        h.warden.consume_unit("u1", "file.lua").await;
    }

    // The 11th check is a quota denial, and stays one.
    assert_eq!(h.warden.ledger.can_consume("u1"), Usability::QuotaExceeded);
    assert_eq!(h.warden.ledger.can_consume("u1"), Usability::QuotaExceeded);

    // The durable table reflects every consumption.
    let tables = h.store().load().await;
    assert_eq!(tables.clients["u1"].files_used_this_period, 10);
    assert_eq!(tables.clients["u1"].access_tier.as_deref(), Some("basic"));
}

#[tokio::test]
async fn revoke_without_account_changes_nothing() {
    let h = TestHarness::new().await;

    let err = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::Revoke {
            user_id: "ghost".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "not_found");

    // No mutation, no durable flush: the table file was never written.
    assert!(!h.dir.path().join("clients.json").exists());
    assert_eq!(h.warden.ledger.clients.len(), 0);
}

#[tokio::test]
async fn revoke_discards_the_account() {
    let h = TestHarness::new().await;

    h.dispatcher
        .dispatch(admin_request("admin1", Command::Grant {
            user_id: "u1".to_string(),
            tier_id: "premium".to_string(),
        }))
        .await
        .expect("grant");

    let payload = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::Revoke {
            user_id: "u1".to_string(),
        }))
        .await
        .expect("revoke");
    assert!(
        matches!(payload, Payload::Revoked { ref previous_tier, .. } if previous_tier.as_deref() == Some("premium"))
    );

    // Hard delete, durably.
    let tables = h.store().load().await;
    assert!(tables.clients.is_empty());
}

#[tokio::test]
async fn tier_management_and_views() {
    let h = TestHarness::new().await;

    let payload = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::AddTier {
            name: "Trial".to_string(),
            quota: 2,
        }))
        .await
        .expect("add tier");
    assert!(matches!(payload, Payload::TierAdded { ref tier_id, quota: 2 } if tier_id == "trial"));

    // Duplicate names are rejected case-insensitively.
    let err = h
        .dispatcher
        .dispatch(admin_request("admin2", Command::AddTier {
            name: "TRIAL".to_string(),
            quota: 5,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "validation");

    let payload = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::ListTiers))
        .await
        .expect("list tiers");
    match payload {
        Payload::Tiers(tiers) => {
            let ids: Vec<&str> = tiers.iter().map(|t| t.id.as_str()).collect();
            assert_eq!(ids, vec!["basic", "premium", "trial", "unlimited"]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // The seeded defaults survive a reload.
    let tables = h.store().load().await;
    assert_eq!(tables.tiers["unlimited"].monthly_quota, -1);
    assert_eq!(tables.tiers["trial"].monthly_quota, 2);
}

#[tokio::test]
async fn check_reports_status_and_history_lists_consumptions() {
    let h = TestHarness::new().await;

    h.dispatcher
        .dispatch(admin_request("admin1", Command::Grant {
            user_id: "u1".to_string(),
            tier_id: "basic".to_string(),
        }))
        .await
        .expect("grant");

    h.dispatcher
        .dispatch(member_request("u1", Command::Protect {
            file_name: "a.txt".to_string(),
            content: b"x".to_vec(),
            preset: None,
        }))
        .await
        .expect("protect");

    let payload = h
        .dispatcher
        .dispatch(member_request("u1", Command::Check))
        .await
        .expect("check");
    match payload {
        Payload::AccessStatus(status) => {
            assert_eq!(status.tier_name.as_deref(), Some("Basic"));
            assert!(status.allowed);
            assert_eq!(status.files_used_this_period, 1);
            assert_eq!(status.monthly_quota, Some(10));
            assert!(status.expiry.is_none());
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    let payload = h
        .dispatcher
        .dispatch(member_request("u1", Command::History))
        .await
        .expect("history");
    match payload {
        Payload::History(lines) => {
            assert_eq!(lines.len(), 1);
            assert!(lines[0].message.contains("a.txt"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn capability_gates_hold() {
    let h = TestHarness::new().await;

    let err = h
        .dispatcher
        .dispatch(member_request("u1", Command::Grant {
            user_id: "u2".to_string(),
            tier_id: "basic".to_string(),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Permission));

    let err = h
        .dispatcher
        .dispatch(member_request("u1", Command::Stats))
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Permission));

    // Maintenance can only be toggled by an owner, and while enabled
    // everyone else bounces.
    let err = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::Maintenance { enable: Some(true) }))
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Permission));

    h.dispatcher
        .dispatch(owner_request("owner1", Command::Maintenance { enable: Some(true) }))
        .await
        .expect("enable maintenance");

    let err = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::ListTiers))
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Permission));

    let payload = h
        .dispatcher
        .dispatch(owner_request("owner1", Command::Maintenance { enable: Some(false) }))
        .await
        .expect("disable maintenance");
    assert!(matches!(payload, Payload::MaintenanceStatus { enabled: false }));
}

#[tokio::test]
async fn duplicate_deliveries_and_cooldowns_are_suppressed() {
    let h = TestHarness::with_config(|config| {
        config.server.command_cooldown_secs = 3;
    })
    .await;

    let mut first = member_request("u1", Command::Check);
    first.delivery_id = Some("delivery-1".to_string());
    // No account yet: the first delivery fails visibly.
    let err = h.dispatcher.dispatch(first.clone()).await.unwrap_err();
    assert_eq!(err.error_code(), "not_found");

    // The replayed delivery is absorbed before any screening.
    let payload = h.dispatcher.dispatch(first).await.expect("duplicate");
    assert!(matches!(payload, Payload::DuplicateDelivery));

    // A fresh delivery of the same command trips the cooldown instead.
    let mut second = member_request("u1", Command::Check);
    second.delivery_id = Some("delivery-2".to_string());
    let err = h.dispatcher.dispatch(second).await.unwrap_err();
    assert!(matches!(err, OpError::Cooldown { seconds } if seconds >= 1));
}

#[tokio::test]
async fn protect_rejects_before_touching_quota() {
    let h = TestHarness::new().await;

    h.dispatcher
        .dispatch(admin_request("admin1", Command::Grant {
            user_id: "u1".to_string(),
            tier_id: "basic".to_string(),
        }))
        .await
        .expect("grant");

    // Unsupported extension: validation error, nothing consumed.
    let err = h
        .dispatcher
        .dispatch(member_request("u1", Command::Protect {
            file_name: "tool.exe".to_string(),
            content: vec![0u8; 16],
            preset: None,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "validation");
    assert_eq!(
        h.warden.ledger.clients.get("u1").unwrap().files_used_this_period,
        0
    );

    // No access at all: denial carries the reason text.
    let err = h
        .dispatcher
        .dispatch(member_request("stranger", Command::Protect {
            file_name: "script.txt".to_string(),
            content: b"x".to_vec(),
            preset: None,
        }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no access configured"));
}
