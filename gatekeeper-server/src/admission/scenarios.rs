//! End-to-end admission flows across issuer, evaluator, sweep and executor.

use chrono::Duration;
use gatekeeper_core::{ChatId, ChatScope, MemberKey, MessageId, MessageKind, UserId};
use proptest::prelude::*;

use super::repository::MemberRepository;
use super::test_utils::{joining_user, t0, GatewayCall, Harness};
use super::EvaluateOutcome;

fn text(s: &str) -> MessageKind {
    MessageKind::Text(s.to_string())
}

fn welcomes(h: &Harness) -> usize {
    h.gateway
        .sent_texts()
        .iter()
        .filter(|t| t.contains("Welcome to the chat"))
        .count()
}

#[tokio::test]
async fn test_three_wrong_answers_ban_on_the_third() {
    let h = Harness::new();
    let issuer = h.issuer();
    let evaluator = h.evaluator();
    let key = MemberKey::new(7, 100);

    let member = issuer.admit(ChatId(100), &joining_user(7)).await.unwrap();
    assert_eq!(member.deadline, t0() + Duration::seconds(60));

    for (secs, msg, expected_retries) in [(5, 11, 1), (10, 12, 2)] {
        h.clock.set(t0() + Duration::seconds(secs));
        let outcome = evaluator
            .evaluate(ChatId(100), UserId(7), MessageId(msg), &text("вражда"))
            .await
            .unwrap();
        assert_eq!(outcome, EvaluateOutcome::Retried);
        let stored = h.repo.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, expected_retries);
        assert_eq!(stored.deadline, t0() + Duration::seconds(secs + 60));
    }
    assert!(h.gateway.bans().is_empty());

    h.clock.set(t0() + Duration::seconds(15));
    let outcome = evaluator
        .evaluate(ChatId(100), UserId(7), MessageId(13), &text("вражда"))
        .await
        .unwrap();

    assert_eq!(outcome, EvaluateOutcome::Banned);
    assert_eq!(h.gateway.bans(), vec![(ChatId(100), UserId(7))]);
    assert!(h.repo.get(&key).await.unwrap().is_none());

    // Every wrong answer and the prompt were removed from the chat
    let deleted = h.gateway.deleted_ids();
    for id in [11, 12, 13] {
        assert!(deleted.contains(&MessageId(id)));
    }
    assert!(deleted.contains(&member.prompt_message_id));
}

#[tokio::test]
async fn test_answer_just_before_sweep_wins() {
    let h = Harness::new();
    h.issuer()
        .admit(ChatId(100), &joining_user(7))
        .await
        .unwrap();

    h.clock.set(t0() + Duration::milliseconds(60_050));
    let outcome = h
        .evaluator()
        .evaluate(ChatId(100), UserId(7), MessageId(20), &text("Дружба"))
        .await
        .unwrap();
    assert_eq!(outcome, EvaluateOutcome::Passed);

    h.clock.set(t0() + Duration::milliseconds(60_100));
    let calls_before_sweep = h.gateway.calls().len();
    let report = h.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.expired, 0);
    assert_eq!(h.gateway.calls().len(), calls_before_sweep);
    assert!(h.gateway.bans().is_empty());
}

#[tokio::test]
async fn test_sweep_before_answer_wins() {
    let h = Harness::new();
    h.issuer()
        .admit(ChatId(100), &joining_user(7))
        .await
        .unwrap();

    h.clock.set(t0() + Duration::milliseconds(60_100));
    let report = h.sweeper().sweep_once().await.unwrap();
    assert_eq!(report.banned, 1);
    let calls_after_sweep = h.gateway.calls().len();

    let outcome = h
        .evaluator()
        .evaluate(ChatId(100), UserId(7), MessageId(20), &text("дружба"))
        .await
        .unwrap();

    assert_eq!(outcome, EvaluateOutcome::NotApplicable);
    assert_eq!(h.gateway.calls().len(), calls_after_sweep);
    assert_eq!(welcomes(&h), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_answer_and_sweep_resolve_once() {
    for _ in 0..50 {
        let h = Harness::new();
        h.issuer()
            .admit(ChatId(100), &joining_user(7))
            .await
            .unwrap();
        h.clock.set(t0() + Duration::milliseconds(60_100));

        let evaluator = h.evaluator();
        let sweeper = h.sweeper();
        let answer = tokio::spawn(async move {
            evaluator
                .evaluate(ChatId(100), UserId(7), MessageId(20), &text("дружба"))
                .await
                .unwrap()
        });
        let sweep = tokio::spawn(async move { sweeper.sweep_once().await.unwrap() });

        let outcome = answer.await.unwrap();
        let report = sweep.await.unwrap();

        let passed = usize::from(outcome == EvaluateOutcome::Passed);
        assert_eq!(passed + report.banned, 1);
        assert_eq!(welcomes(&h), passed);
        assert_eq!(h.gateway.bans().len(), report.banned);
    }
}

#[tokio::test]
async fn test_silent_members_are_all_swept_within_one_interval() {
    let h = Harness::new();
    let issuer = h.issuer();
    for (offset, user) in [(0, 1), (3, 2), (9, 3)] {
        h.clock.set(t0() + Duration::seconds(offset));
        issuer
            .admit(ChatId(100), &joining_user(user))
            .await
            .unwrap();
    }

    // Latest deadline is t0+69; a sweep one interval later catches everyone
    let interval = Duration::from_std(h.ctx.config.sweep_interval).unwrap();
    h.clock.set(t0() + Duration::seconds(69) + interval);
    let report = h.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.banned, 3);
    assert!(h.repo.list(ChatScope::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_late_messages_after_resolution_do_nothing() {
    let h = Harness::new();
    h.issuer()
        .admit(ChatId(100), &joining_user(7))
        .await
        .unwrap();
    let evaluator = h.evaluator();
    evaluator
        .evaluate(ChatId(100), UserId(7), MessageId(20), &text("дружба"))
        .await
        .unwrap();
    let calls = h.gateway.calls();

    for (id, msg) in [(21, text("дружба")), (22, text("nope")), (23, MessageKind::Sticker)] {
        let outcome = evaluator
            .evaluate(ChatId(100), UserId(7), MessageId(id), &msg)
            .await
            .unwrap();
        assert_eq!(outcome, EvaluateOutcome::NotApplicable);
    }
    assert_eq!(h.gateway.calls(), calls);
}

#[tokio::test]
async fn test_rejoin_after_ban_gets_a_fresh_challenge() {
    let h = Harness::new();
    let issuer = h.issuer();
    issuer.admit(ChatId(100), &joining_user(7)).await.unwrap();
    h.clock.set(t0() + Duration::seconds(61));
    h.sweeper().sweep_once().await.unwrap();

    h.clock.set(t0() + Duration::seconds(700));
    let member = issuer.admit(ChatId(100), &joining_user(7)).await.unwrap();

    assert_eq!(member.retry_count, 0);
    assert_eq!(member.deadline, t0() + Duration::seconds(760));
    let prompts = h
        .gateway
        .calls()
        .into_iter()
        .filter(|c| matches!(c, GatewayCall::Send { text, .. } if text.contains("Attempts left")))
        .count();
    assert_eq!(prompts, 2);
}

#[derive(Debug, Clone)]
enum Actor {
    Answer(bool),
    Sweep,
}

fn arb_actor() -> impl Strategy<Value = Actor> {
    prop_oneof![
        any::<bool>().prop_map(Actor::Answer),
        Just(Actor::Sweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: whatever mix of answers and sweeps runs concurrently, the
    /// member is admitted or banned exactly once.
    #[test]
    fn member_resolves_exactly_once(
        actors in proptest::collection::vec(arb_actor(), 1..12),
        expired in any::<bool>(),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .build()
            .unwrap();
        rt.block_on(async {
            let h = Harness::new();
            h.issuer()
                .admit(ChatId(100), &joining_user(7))
                .await
                .unwrap();
            if expired {
                h.clock.set(t0() + Duration::seconds(60));
            }

            let handles: Vec<_> = actors
                .iter()
                .enumerate()
                .map(|(i, actor)| {
                    let evaluator = h.evaluator();
                    let sweeper = h.sweeper();
                    let actor = actor.clone();
                    tokio::spawn(async move {
                        match actor {
                            Actor::Answer(correct) => {
                                let msg = if correct { text("дружба") } else { text("nope") };
                                evaluator
                                    .evaluate(ChatId(100), UserId(7), MessageId(100 + i as i64), &msg)
                                    .await
                                    .map(|_| ())
                                    .map_err(|e| e.to_string())
                            }
                            Actor::Sweep => sweeper
                                .sweep_once()
                                .await
                                .map(|_| ())
                                .map_err(|e| e.to_string()),
                        }
                    })
                })
                .collect();
            for handle in handles {
                prop_assert!(handle.await.unwrap().is_ok());
            }

            // Whatever is still pending is eventually swept
            h.clock.set(t0() + Duration::hours(1));
            h.sweeper().sweep_once().await.unwrap();

            prop_assert_eq!(h.gateway.bans().len() + welcomes(&h), 1);
            prop_assert!(h.repo.list(ChatScope::All).await.unwrap().is_empty());
            Ok(())
        })?;
    }
}
