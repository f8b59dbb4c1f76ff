use bitsynq_core::db;
use bitsynq_core::schema::{ContributionEntry, DistributionStatus, MemberRole, User};
use bitsynq_core::service::{self, DistributionRequest};
use bitsynq_core::settlement::{RecordingSettlement, Settlement, SettlementError, Transfer};
use bitsynq_core::Error;
use pretty_assertions::assert_eq;
use rusqlite::Connection;
use std::cell::RefCell;
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    conn: Connection,
    alice: User,
    bob: User,
    carol: User,
    project_id: String,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let conn = db::open(&dir.path().join("ledger.db")).unwrap();

    let alice = db::create_user(&conn, "alice@example.com", "Alice").unwrap();
    let bob = db::create_user(&conn, "bob@example.com", "Bob").unwrap();
    let carol = db::create_user(&conn, "carol@example.com", "Carol").unwrap();
    let project = db::create_project(&conn, &alice.id, "Bitsynq", None, None).unwrap();
    for user in [&bob, &carol] {
        db::add_member(&conn, &project.id, &alice.id, &user.id, MemberRole::Member).unwrap();
    }

    for (user, ratio) in [(&alice, 1.0), (&bob, 1.0), (&carol, 1.0)] {
        db::add_contribution(
            &conn,
            &project.id,
            &alice.id,
            &ContributionEntry {
                user_id: user.id.clone(),
                ratio,
                description: Some("sprint work".to_string()),
            },
        )
        .unwrap();
    }

    Fixture {
        dir,
        conn,
        alice,
        bob,
        carol,
        project_id: project.id,
    }
}

fn request(total_tokens: u64, on_chain: bool) -> DistributionRequest {
    DistributionRequest {
        milestone_name: Some("v1.0".to_string()),
        total_tokens,
        on_chain,
    }
}

fn set_wallets(fx: &Fixture) {
    for (user, wallet) in [
        (&fx.alice, "0x1111111111111111111111111111111111111111"),
        (&fx.bob, "0x2222222222222222222222222222222222222222"),
        (&fx.carol, "0x3333333333333333333333333333333333333333"),
    ] {
        db::set_wallet(&fx.conn, &user.id, wallet).unwrap();
    }
}

struct FailingSettlement;

impl Settlement for FailingSettlement {
    fn settle(&self, _transfers: &[Transfer]) -> Result<String, SettlementError> {
        Err(SettlementError("node unavailable".to_string()))
    }
}

#[derive(Default)]
struct CapturingSettlement {
    batches: RefCell<Vec<Vec<Transfer>>>,
}

impl Settlement for CapturingSettlement {
    fn settle(&self, transfers: &[Transfer]) -> Result<String, SettlementError> {
        self.batches.borrow_mut().push(transfers.to_vec());
        Ok("0xabc".to_string())
    }
}

#[test]
fn preview_matches_persisted_distribution() {
    let fx = fixture();
    let preview = service::preview(&fx.conn, &fx.project_id, &fx.alice.id, &request(100, false)).unwrap();

    let total: u64 = preview.iter().map(|line| line.token_amount).sum();
    assert_eq!(total, 100);
    let mut amounts: Vec<u64> = preview.iter().map(|line| line.token_amount).collect();
    amounts.sort_unstable();
    assert_eq!(amounts, vec![33, 33, 34]);
    assert!(preview.windows(2).all(|w| w[0].token_amount >= w[1].token_amount));

    let distribution =
        service::distribute(&fx.conn, &fx.project_id, &fx.alice.id, &request(100, false), None, 18).unwrap();
    assert_eq!(distribution.status, DistributionStatus::Confirmed);
    assert_eq!(distribution.tx_hash, None);
    for line in &preview {
        assert_eq!(distribution.distribution_data[&line.user_id].token_amount, line.token_amount);
    }

    let stored = db::get_distribution(&fx.conn, &fx.project_id, &distribution.id).unwrap();
    assert_eq!(stored.distribution_data, distribution.distribution_data);
    assert_eq!(stored.milestone_name.as_deref(), Some("v1.0"));
    assert_eq!(db::total_distributed(&fx.conn, &fx.project_id).unwrap(), 100);
}

#[test]
fn distribution_credits_balances() {
    let fx = fixture();
    let distribution =
        service::distribute(&fx.conn, &fx.project_id, &fx.alice.id, &request(100, false), None, 18).unwrap();
    service::distribute(&fx.conn, &fx.project_id, &fx.alice.id, &request(100, false), None, 18).unwrap();

    let balances = db::balances(&fx.conn, &fx.project_id).unwrap();
    assert_eq!(balances.len(), 3);
    assert_eq!(balances.iter().map(|b| b.balance).sum::<u64>(), 200);
    assert!(balances.windows(2).all(|w| w[0].balance >= w[1].balance));

    let bob = db::balance_of(&fx.conn, &fx.project_id, &fx.bob.id).unwrap();
    assert_eq!(bob.balance, 2 * distribution.distribution_data[&fx.bob.id].token_amount);
    assert_eq!(db::list_distributions(&fx.conn, &fx.project_id).unwrap().len(), 2);
}

#[test]
fn only_admins_distribute_positive_budgets() {
    let fx = fixture();
    let err = service::preview(&fx.conn, &fx.project_id, &fx.bob.id, &request(100, false)).unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let err = service::preview(&fx.conn, &fx.project_id, &fx.alice.id, &request(0, false)).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn project_without_contributions_cannot_distribute() {
    let fx = fixture();
    let empty = db::create_project(&fx.conn, &fx.alice.id, "Empty", None, None).unwrap();
    let err = service::distribute(&fx.conn, &empty.id, &fx.alice.id, &request(100, false), None, 18).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn on_chain_requires_every_wallet() {
    let fx = fixture();
    db::set_wallet(&fx.conn, &fx.alice.id, "0x1111111111111111111111111111111111111111").unwrap();

    let settlement = CapturingSettlement::default();
    let err = service::distribute(
        &fx.conn,
        &fx.project_id,
        &fx.alice.id,
        &request(100, true),
        Some(&settlement),
        18,
    )
    .unwrap_err();

    let message = match err {
        Error::Validation(message) => message,
        other => panic!("expected a validation error, got {other:?}"),
    };
    assert!(message.contains(&fx.bob.id));
    assert!(message.contains(&fx.carol.id));
    assert!(!message.contains(&fx.alice.id));
    assert!(settlement.batches.borrow().is_empty());
}

#[test]
fn settlement_failure_persists_nothing() {
    let fx = fixture();
    set_wallets(&fx);

    let err = service::distribute(
        &fx.conn,
        &fx.project_id,
        &fx.alice.id,
        &request(100, true),
        Some(&FailingSettlement),
        18,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Settlement(_)));

    assert!(db::list_distributions(&fx.conn, &fx.project_id).unwrap().is_empty());
    assert!(db::balances(&fx.conn, &fx.project_id).unwrap().iter().all(|b| b.balance == 0));
    assert_eq!(db::total_distributed(&fx.conn, &fx.project_id).unwrap(), 0);
}

#[test]
fn on_chain_transfers_are_scaled_and_hash_recorded() {
    let fx = fixture();
    set_wallets(&fx);

    let settlement = CapturingSettlement::default();
    let distribution = service::distribute(
        &fx.conn,
        &fx.project_id,
        &fx.alice.id,
        &request(100, true),
        Some(&settlement),
        6,
    )
    .unwrap();
    assert_eq!(distribution.tx_hash.as_deref(), Some("0xabc"));

    let batches = settlement.batches.borrow();
    assert_eq!(batches.len(), 1);
    let total: u128 = batches[0].iter().map(|t| t.amount).sum();
    assert_eq!(total, 100_000_000);
}

#[test]
fn recording_settlement_end_to_end() {
    let fx = fixture();
    set_wallets(&fx);

    let outbox = fx.dir.path().join("settlements");
    let settlement = RecordingSettlement::new(&outbox);
    let distribution = service::distribute(
        &fx.conn,
        &fx.project_id,
        &fx.alice.id,
        &request(10, true),
        Some(&settlement),
        18,
    )
    .unwrap();

    let tx_hash = distribution.tx_hash.unwrap();
    assert!(outbox.join(format!("{tx_hash}.json")).exists());

    db::update_settlement(&fx.conn, &distribution.id, Some(&tx_hash), DistributionStatus::Pending).unwrap();
    assert_eq!(db::total_distributed(&fx.conn, &fx.project_id).unwrap(), 0);
}

#[test]
fn zero_ratio_contributions_still_spend_the_budget() {
    let fx = fixture();
    let project = db::create_project(&fx.conn, &fx.alice.id, "Zero", None, None).unwrap();
    db::add_member(&fx.conn, &project.id, &fx.alice.id, &fx.bob.id, MemberRole::Member).unwrap();
    for user in [&fx.alice, &fx.bob] {
        db::add_contribution(
            &fx.conn,
            &project.id,
            &fx.alice.id,
            &ContributionEntry {
                user_id: user.id.clone(),
                ratio: 0.0,
                description: None,
            },
        )
        .unwrap();
    }

    let preview = service::preview(&fx.conn, &project.id, &fx.alice.id, &request(1001, false)).unwrap();
    assert_eq!(preview.iter().map(|line| line.token_amount).sum::<u64>(), 1001);

    let distribution =
        service::distribute(&fx.conn, &project.id, &fx.alice.id, &request(1001, false), None, 18).unwrap();
    for line in &preview {
        assert_eq!(distribution.distribution_data[&line.user_id].token_amount, line.token_amount);
    }
    let mut amounts: Vec<u64> = preview.iter().map(|line| line.token_amount).collect();
    amounts.sort_unstable();
    assert_eq!(amounts, vec![500, 501]);
    assert_eq!(db::total_distributed(&fx.conn, &project.id).unwrap(), 1001);
}

#[test]
fn large_budgets_are_split_exactly() {
    let fx = fixture();
    let budget = (1u64 << 54) + 3;
    let preview = service::preview(&fx.conn, &fx.project_id, &fx.alice.id, &request(budget, false)).unwrap();
    assert_eq!(preview.iter().map(|line| line.token_amount).sum::<u64>(), budget);
}
