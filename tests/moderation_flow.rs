//! Integration tests for moderation operations and the automod screens.

mod common;

use common::{TestHarness, admin_request, member_request, moderator_request};
use wardend::dispatch::{Command, Payload};
use wardend::error::OpError;
use wardend::moderation::automod::{MessageEvent, MessageVerdict, ScreenReason};

fn message<'a>(author: &'a str, content: &'a str) -> MessageEvent<'a> {
    MessageEvent {
        author_id: author,
        author_is_bot: false,
        author_is_privileged: false,
        user_mentions: 0,
        role_mentions: 0,
        content,
    }
}

#[tokio::test]
async fn warn_and_mute_lifecycle() {
    let h = TestHarness::new().await;

    let payload = h
        .dispatcher
        .dispatch(moderator_request("mod1", Command::Warn {
            user_id: "u1".to_string(),
            reason: "flooding".to_string(),
        }))
        .await
        .expect("warn");
    assert!(matches!(payload, Payload::Warned { .. }));

    // Out-of-range mute durations are rejected up front.
    let err = h
        .dispatcher
        .dispatch(moderator_request("mod1", Command::Mute {
            user_id: "u1".to_string(),
            minutes: 0,
            reason: "flooding".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "validation");
    let err = h
        .dispatcher
        .dispatch(moderator_request("mod2", Command::Mute {
            user_id: "u1".to_string(),
            minutes: 40_321,
            reason: "flooding".to_string(),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "validation");

    let payload = h
        .dispatcher
        .dispatch(moderator_request("mod3", Command::Mute {
            user_id: "u1".to_string(),
            minutes: 15,
            reason: "flooding".to_string(),
        }))
        .await
        .expect("mute");
    assert!(matches!(payload, Payload::MuteRecorded { .. }));

    // Unmute is admin-gated.
    let err = h
        .dispatcher
        .dispatch(moderator_request("mod1", Command::Unmute {
            user_id: "u1".to_string(),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Permission));

    let payload = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::Unmute {
            user_id: "u1".to_string(),
        }))
        .await
        .expect("unmute");
    assert!(matches!(payload, Payload::UnmuteRecorded { was_muted: true }));

    // Warnings are append-only: still there after the mute cycle.
    assert_eq!(h.warden.moderation.read().warnings["u1"].len(), 1);
}

#[tokio::test]
async fn member_cannot_warn() {
    let h = TestHarness::new().await;
    let err = h
        .dispatcher
        .dispatch(member_request("u1", Command::Warn {
            user_id: "u2".to_string(),
            reason: "nope".to_string(),
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, OpError::Permission));
}

#[tokio::test]
async fn whitelist_short_circuits_the_blacklist() {
    let h = TestHarness::new().await;
    h.warden.set_blacklisted("u1", true).await;

    assert_eq!(
        h.dispatcher.screen_message(message("u1", "hello")),
        Some(MessageVerdict::Delete(ScreenReason::Blacklisted))
    );

    // Whitelist wins even while the blacklist entry remains.
    h.warden.set_whitelisted("u1", true).await;
    assert_eq!(h.dispatcher.screen_message(message("u1", "hello")), None);
    assert!(h.warden.moderation.read().blacklist.contains("u1"));
}

#[tokio::test]
async fn link_and_ping_screens_follow_the_toggles() {
    let h = TestHarness::new().await;

    assert_eq!(
        h.dispatcher.screen_message(message("u1", "join https://spam.example")),
        Some(MessageVerdict::Delete(ScreenReason::Link))
    );

    let mut ping = message("u2", "hello");
    ping.user_mentions = 6;
    assert_eq!(
        h.dispatcher.screen_message(ping),
        Some(MessageVerdict::DeleteAndMute {
            minutes: 5,
            reason: ScreenReason::ExcessivePings
        })
    );

    // Privileged authors bypass everything.
    let mut privileged = message("mod1", "see https://spam.example");
    privileged.author_is_privileged = true;
    assert_eq!(h.dispatcher.screen_message(privileged), None);

    // Disable the screens; both messages pass.
    let mut flags = h.warden.moderation.read().automod;
    flags.antilink = false;
    flags.antiping = false;
    h.warden.set_automod_flags(flags).await;
    assert_eq!(
        h.dispatcher.screen_message(message("u1", "join https://spam.example")),
        None
    );
}

#[tokio::test]
async fn join_screens_catch_bots_and_raids() {
    let h = TestHarness::new().await;

    let verdict = h.dispatcher.screen_join("g1", "bot1", true, 10, 0);
    assert!(verdict.kick_bot);

    // Six human joins in quick succession trip the raid alert.
    let mut alert = None;
    for i in 0..6 {
        let verdict = h.dispatcher.screen_join("g1", &format!("u{i}"), false, 1000, 1);
        assert!(!verdict.kick_bot);
        alert = verdict.raid_alert;
    }
    assert_eq!(alert, Some(6));

    let payload = h
        .dispatcher
        .dispatch(admin_request("admin1", Command::Stats))
        .await
        .expect("stats");
    match payload {
        Payload::Stats(stats) => {
            assert_eq!(stats.client_count, 0);
            assert_eq!(stats.open_tickets, 0);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}
