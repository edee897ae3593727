use async_trait::async_trait;
use resource_gate::auth::{grant_role, Account, CatalogDirectory, Role, Rule, RuleStore, UserDirectory, ALL, MANAGE};
use resource_gate::config::{LOG_RESOURCE, USER_RESOURCE};
use resource_gate::{scan, AppError, CatalogConfig, MemoryExecutor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// In-memory directory that counts account lookups and answers slowly.
#[derive(Default)]
struct CountingDirectory {
    accounts: HashMap<i64, Account>,
    groups: HashMap<i64, Vec<Rule>>,
    lookups: AtomicUsize,
}

impl CountingDirectory {
    fn with_account(mut self, id: i64, role: i64, group_ids: Vec<i64>) -> Self {
        self.accounts.insert(
            id,
            Account {
                id,
                name: None,
                email: format!("u{}@example.com", id),
                icon: None,
                role,
                group_ids,
            },
        );
        self
    }

    fn with_group(mut self, id: i64, rules: Vec<Rule>) -> Self {
        self.groups.insert(id, rules);
        self
    }
}

#[async_trait]
impl UserDirectory for CountingDirectory {
    async fn account(&self, user_id: i64) -> Result<Option<Account>, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self.accounts.get(&user_id).cloned())
    }

    async fn group_rules(&self, group_ids: &[i64]) -> Result<Vec<Vec<Rule>>, AppError> {
        Ok(group_ids.iter().filter_map(|id| self.groups.get(id).cloned()).collect())
    }
}

fn store(directory: CountingDirectory) -> (Arc<CountingDirectory>, RuleStore) {
    let directory = Arc::new(directory);
    let store = RuleStore::new(directory.clone(), 128, Duration::from_secs(10));
    (directory, store)
}

#[tokio::test(start_paused = true)]
async fn rules_merge_groups_then_role_then_overrides() {
    let (_, store) = store(
        CountingDirectory::default()
            .with_group(1, vec![Rule::allow("report", "export")])
            .with_group(2, vec![Rule::deny("report", "export")])
            .with_account(7, 1, vec![2, 1]),
    );
    let rules = store.rules_for(7).await.unwrap();
    assert_eq!(
        rules.rules(),
        &[
            Rule::deny("report", "export"),
            Rule::allow("report", "export"),
            Rule::deny(LOG_RESOURCE, ["create", "update", "delete", "import"]),
        ]
    );
    assert!(rules.can("export", "report"));
}

#[tokio::test(start_paused = true)]
async fn role_rules_override_group_grants() {
    let (_, store) = store(
        CountingDirectory::default()
            .with_group(1, vec![Rule::allow(ALL, MANAGE)])
            .with_account(3, 0, vec![1]),
    );
    let rules = store.rules_for(3).await.unwrap();
    assert!(!rules.can("read", "shop_order"));
}

#[tokio::test(start_paused = true)]
async fn unknown_user_and_role_are_errors() {
    let (_, store) = store(CountingDirectory::default().with_account(9, 5, vec![]));
    assert!(matches!(store.rules_for(8).await, Err(AppError::UserNotFound(8))));
    assert!(matches!(store.rules_for(9).await, Err(AppError::InvalidRole(5))));
}

#[tokio::test(start_paused = true)]
async fn concurrent_first_lookups_compute_once() {
    let (directory, store) = store(CountingDirectory::default().with_account(1, 64, vec![]));
    let (a, b) = tokio::join!(store.rules_for(1), store.rules_for(1));
    assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cached_rules_expire_and_can_be_invalidated() {
    let (directory, store) = store(CountingDirectory::default().with_account(1, 16, vec![]));
    store.rules_for(1).await.unwrap();
    store.rules_for(1).await.unwrap();
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    store.rules_for(1).await.unwrap();
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 2);

    store.invalidate(1);
    store.rules_for(1).await.unwrap();
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn failed_lookups_are_not_cached() {
    let (directory, store) = store(CountingDirectory::default());
    assert!(store.rules_for(2).await.is_err());
    assert!(store.rules_for(2).await.is_err());
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_lookups_of_a_missing_user_share_one_failure() {
    let (directory, store) = store(CountingDirectory::default());
    let (a, b, c) = tokio::join!(store.rules_for(2), store.rules_for(2), store.rules_for(2));
    for outcome in [a, b, c] {
        assert!(matches!(outcome, Err(AppError::UserNotFound(2))));
    }
    assert_eq!(directory.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn granting_a_role_creates_then_promotes_by_email() {
    let catalog = scan(&CatalogConfig::default().with_builtins()).unwrap();
    let executor = MemoryExecutor::new();

    let created = grant_role(&catalog, &executor, "ops@example.com", Role::Guest).await.unwrap();
    assert_eq!(created.role, 1);
    let promoted = grant_role(&catalog, &executor, " ops@example.com ", Role::Super).await.unwrap();
    assert_eq!(promoted.id, created.id);
    assert_eq!(promoted.role, 64);
    assert_eq!(executor.rows(USER_RESOURCE).len(), 1);

    let err = grant_role(&catalog, &executor, "not-an-email", Role::Super).await.unwrap_err();
    assert!(matches!(err, AppError::Validation { ref path, .. } if path == "body.email"));

    let directory = Arc::new(CatalogDirectory::new(&catalog, Arc::new(executor.clone())).unwrap());
    let rules = RuleStore::new(directory, 8, Duration::from_secs(10))
        .rules_for(promoted.id)
        .await
        .unwrap();
    assert!(rules.can("delete", USER_RESOURCE));
    assert!(!rules.can("delete", LOG_RESOURCE));
}
