use std::collections::BTreeMap;

use mapper::{
  client::{MemoryClient, ResourceClient},
  retry::{self, Intent, Outcome},
  set::{ROLES_KEY, USERS_KEY},
  Arn, Error, IdentityMapping, MappingSet, Removal, Store,
};

const ADMIN: &str = "arn:aws:iam::111122223333:role/Admin";
const DEV: &str = "arn:aws:iam::111122223333:role/Dev";
const ALICE: &str = "arn:aws:iam::111122223333:user/alice";

fn arn(text: &str) -> Arn {
  Arn::parse(text).expect("arn")
}

fn mapping(text: &str, username: &str, groups: &[&str]) -> IdentityMapping {
  IdentityMapping::new(arn(text), Some(username.to_string()), groups.iter().copied())
    .expect("mapping")
}

fn persisted(client: &MemoryClient) -> MappingSet {
  MappingSet::from_data(&client.data().expect("resource exists")).expect("decode")
}

#[tokio::test]
async fn first_save_creates_resource() {
  let client = MemoryClient::new("aws-auth");
  let mut store = Store::new(client.clone());

  store.load().await.expect("load");
  assert!(store.mappings().expect("loaded").is_empty());
  assert_eq!(store.version(), None);

  store
    .add_mapping(mapping(ADMIN, "admin", &["system:masters"]))
    .expect("add");
  store.save().await.expect("save");

  let saved = persisted(&client);
  assert_eq!(saved.roles().len(), 1);
  assert!(saved.users().is_empty());
  assert_eq!(saved.roles()[0].arn(), &arn(ADMIN));
  assert_eq!(saved.roles()[0].username(), Some("admin"));
  assert_eq!(saved.roles()[0].groups(), ["system:masters".to_string()]);
  assert_eq!(store.version(), client.version().as_deref());
}

#[tokio::test]
async fn remove_first_of_duplicates() {
  let client = MemoryClient::new("aws-auth");
  let mut store = Store::new(client.clone());
  store.load().await.expect("load");
  store.add_mapping(mapping(ADMIN, "first", &[])).expect("add");
  store.add_mapping(mapping(ADMIN, "second", &[])).expect("add");

  let removal = store.remove_mapping(&arn(ADMIN), false).expect("remove");
  assert_eq!(removal, Removal { removed: 1, remaining: 1 });

  let left = store.list_mappings(Some(&arn(ADMIN))).expect("list");
  assert_eq!(left.len(), 1);
  assert_eq!(left[0].username(), Some("second"));

  let err = store.remove_mapping(&arn(ALICE), true).expect_err("no alice");
  assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn stale_session_conflicts_then_reapplies() {
  let client = MemoryClient::new("aws-auth");
  let mut a = Store::new(client.clone());
  let mut b = Store::new(client.clone());
  a.load().await.expect("load a");
  b.load().await.expect("load b");

  a.add_mapping(mapping(ADMIN, "admin", &["system:masters"])).expect("add a");
  a.save().await.expect("save a");

  b.add_mapping(mapping(DEV, "dev", &["dev"])).expect("add b");
  let err = b.save().await.expect_err("stale version");
  assert!(err.is_conflict(), "{err}");
  assert!(!b.is_loaded());
  assert!(matches!(b.mappings(), Err(Error::NotLoaded { .. })));

  b.load().await.expect("reload b");
  b.add_mapping(mapping(DEV, "dev", &["dev"])).expect("reapply b");
  b.save().await.expect("save b");

  let saved = persisted(&client);
  assert_eq!(saved.get(&arn(ADMIN)).len(), 1);
  assert_eq!(saved.get(&arn(DEV)).len(), 1);
}

#[tokio::test]
async fn session_keeps_saving_after_success() {
  let client = MemoryClient::new("aws-auth");
  let mut store = Store::new(client.clone());
  store.load().await.expect("load");

  store.add_mapping(mapping(ADMIN, "admin", &[])).expect("add");
  store.save().await.expect("first save");
  store.add_mapping(mapping(ALICE, "alice", &["dev"])).expect("add");
  store.save().await.expect("second save");

  let saved = persisted(&client);
  assert_eq!(&saved, store.mappings().expect("loaded"));
  assert_eq!(client.version().as_deref(), Some("2"));
}

#[tokio::test]
async fn unmanaged_keys_survive_save() {
  let mut data = BTreeMap::new();
  data.insert("mapAccounts".to_string(), "- \"111122223333\"\n".to_string());
  data.insert(
    USERS_KEY.to_string(),
    format!("- userarn: {ALICE}\n  username: alice\n"),
  );
  let client = MemoryClient::with_data("aws-auth", data);

  let mut store = Store::new(client.clone());
  store.load().await.expect("load");
  assert_eq!(store.list_mappings(None).expect("list").len(), 1);
  store.add_mapping(mapping(ADMIN, "admin", &[])).expect("add");
  store.commit().await.expect("commit");

  let data = client.data().expect("resource");
  assert_eq!(data.get("mapAccounts").map(String::as_str), Some("- \"111122223333\"\n"));
  assert!(data.contains_key(ROLES_KEY));
  let saved = persisted(&client);
  assert_eq!(saved.len(), 2);
}

#[tokio::test]
async fn corrupt_resource_fails_load() {
  let mut data = BTreeMap::new();
  data.insert(
    ROLES_KEY.to_string(),
    format!("- rolearn: {ADMIN}\n  username: admin\n- rolearn: broken\n  username: x\n"),
  );
  let client = MemoryClient::with_data("aws-auth", data);
  let mut store = Store::new(client);

  let err = store.load().await.expect_err("corrupt");
  assert!(matches!(err, Error::MalformedEntry { .. }), "{err}");
  assert!(!store.is_loaded());
}

#[tokio::test]
async fn operations_need_a_load() {
  let mut store = Store::new(MemoryClient::new("aws-auth"));
  assert!(matches!(
    store.add_mapping(mapping(ADMIN, "admin", &[])),
    Err(Error::NotLoaded { .. })
  ));
  assert!(matches!(store.save().await, Err(Error::NotLoaded { .. })));
}

/// Lets a rival writer save right after each of the first `remaining` reads.
struct RacingClient {
  inner: MemoryClient,
  remaining: std::sync::Mutex<usize>,
}

#[async_trait::async_trait]
impl ResourceClient for RacingClient {
  fn resource(&self) -> String {
    self.inner.resource()
  }

  async fn get(&self) -> mapper::Result<Option<mapper::client::Snapshot>> {
    let snapshot = self.inner.get().await?;
    let race = {
      let mut remaining = self.remaining.lock().unwrap();
      let race = *remaining > 0;
      if race {
        *remaining -= 1;
      }
      race
    };
    if race {
      // another writer sneaks in right after our read
      let mut rival = Store::new(self.inner.clone());
      rival.load().await?;
      rival.add_mapping(mapping(DEV, "rival", &[]))?;
      rival.save().await?;
    }
    Ok(snapshot)
  }

  async fn update(&self, data: BTreeMap<String, String>, expected: Option<&str>) -> mapper::Result<String> {
    self.inner.update(data, expected).await
  }
}

fn racing(races: usize) -> (MemoryClient, RacingClient) {
  let inner = MemoryClient::new("aws-auth");
  let client = RacingClient {
    inner: inner.clone(),
    remaining: std::sync::Mutex::new(races),
  };
  (inner, client)
}

#[tokio::test]
async fn retry_reapplies_after_conflict() {
  let (inner, client) = racing(2);
  let mut store = Store::new(client);

  let intent = Intent::Add(mapping(ADMIN, "admin", &["system:masters"]));
  let outcome = retry::apply(&mut store, &intent, 3).await.expect("apply");
  assert_eq!(outcome, Outcome::Added);

  let saved = persisted(&inner);
  assert_eq!(saved.get(&arn(ADMIN)).len(), 1);
  assert_eq!(saved.get(&arn(DEV)).len(), 2);
}

#[tokio::test]
async fn retry_gives_up_with_conflict() {
  let (inner, client) = racing(5);
  let mut store = Store::new(client);

  let intent = Intent::Add(mapping(ADMIN, "admin", &[]));
  let err = retry::apply(&mut store, &intent, 3).await.expect_err("exhausted");
  assert!(err.is_conflict(), "{err}");
  assert!(persisted(&inner).get(&arn(ADMIN)).is_empty());
}

#[tokio::test]
async fn retry_remove_reports_remaining() {
  let client = MemoryClient::new("aws-auth");
  for name in ["one", "two", "three"] {
    let mut store = Store::new(client.clone());
    retry::apply(&mut store, &Intent::Add(mapping(ADMIN, name, &[])), 3)
      .await
      .expect("add");
  }

  let mut store = Store::new(client.clone());
  let intent = Intent::Remove {
    arn: arn(ADMIN),
    all: false,
  };
  let outcome = retry::apply(&mut store, &intent, 3).await.expect("remove one");
  assert_eq!(outcome, Outcome::Removed(Removal { removed: 1, remaining: 2 }));

  let intent = Intent::Remove {
    arn: arn(ADMIN),
    all: true,
  };
  let outcome = retry::apply(&mut store, &intent, 3).await.expect("remove all");
  assert_eq!(outcome, Outcome::Removed(Removal { removed: 2, remaining: 0 }));

  let err = retry::apply(&mut store, &intent, 3).await.expect_err("nothing left");
  assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn retry_upsert_skips_unchanged_write() {
  let client = MemoryClient::new("aws-auth");
  let mut store = Store::new(client.clone());
  let intent = Intent::Upsert(mapping(ADMIN, "admin", &["system:masters"]));

  assert_eq!(retry::apply(&mut store, &intent, 3).await.expect("create"), Outcome::Updated);
  let version = client.version();
  assert_eq!(retry::apply(&mut store, &intent, 3).await.expect("again"), Outcome::Unchanged);
  assert_eq!(client.version(), version);
}

/// Passes through to `inner` until told to fail reads or writes.
struct FlakyClient {
  inner: MemoryClient,
  fail_get: std::sync::atomic::AtomicBool,
  fail_update: std::sync::atomic::AtomicBool,
}

impl FlakyClient {
  fn new(inner: MemoryClient) -> Self {
    FlakyClient {
      inner,
      fail_get: Default::default(),
      fail_update: Default::default(),
    }
  }

  fn outage(&self, op: &'static str) -> Error {
    Error::Transport {
      op,
      resource: self.resource(),
      source: kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "apiserver unavailable".to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
      }),
    }
  }
}

#[async_trait::async_trait]
impl ResourceClient for FlakyClient {
  fn resource(&self) -> String {
    self.inner.resource()
  }

  async fn get(&self) -> mapper::Result<Option<mapper::client::Snapshot>> {
    if self.fail_get.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(self.outage("get"));
    }
    self.inner.get().await
  }

  async fn update(&self, data: BTreeMap<String, String>, expected: Option<&str>) -> mapper::Result<String> {
    if self.fail_update.load(std::sync::atomic::Ordering::SeqCst) {
      return Err(self.outage("update"));
    }
    self.inner.update(data, expected).await
  }
}

#[tokio::test]
async fn transport_error_on_load_keeps_session() {
  let inner = MemoryClient::new("aws-auth");
  let mut store = Store::new(FlakyClient::new(inner.clone()));
  store.load().await.expect("load");
  store.add_mapping(mapping(ADMIN, "admin", &[])).expect("add");

  store.client().fail_get.store(true, std::sync::atomic::Ordering::SeqCst);
  let err = store.load().await.expect_err("outage");
  assert!(matches!(err, Error::Transport { op: "get", .. }), "{err}");
  assert!(!err.is_conflict());

  assert!(store.is_loaded());
  assert_eq!(store.list_mappings(Some(&arn(ADMIN))).expect("list").len(), 1);
}

#[tokio::test]
async fn transport_error_on_save_keeps_session() {
  let inner = MemoryClient::new("aws-auth");
  let mut store = Store::new(FlakyClient::new(inner.clone()));
  store.load().await.expect("load");
  store.add_mapping(mapping(ADMIN, "admin", &["system:masters"])).expect("add");

  store.client().fail_update.store(true, std::sync::atomic::Ordering::SeqCst);
  let err = store.save().await.expect_err("outage");
  assert!(matches!(err, Error::Transport { op: "update", .. }), "{err}");
  assert!(store.is_loaded());
  assert_eq!(store.mappings().expect("loaded").len(), 1);
  assert!(inner.data().is_none());

  store.client().fail_update.store(false, std::sync::atomic::Ordering::SeqCst);
  store.save().await.expect("save after outage");
  assert_eq!(persisted(&inner).get(&arn(ADMIN)).len(), 1);
}

#[tokio::test]
async fn retry_does_not_repeat_transport_errors() {
  let inner = MemoryClient::new("aws-auth");
  let client = FlakyClient::new(inner.clone());
  client.fail_update.store(true, std::sync::atomic::Ordering::SeqCst);
  let mut store = Store::new(client);

  let intent = Intent::Add(mapping(ADMIN, "admin", &[]));
  let err = retry::apply(&mut store, &intent, 3).await.expect_err("outage");
  assert!(matches!(err, Error::Transport { .. }), "{err}");
  assert!(inner.data().is_none());
}

#[tokio::test]
async fn retry_remove_grant_keeps_other_grants() {
  let client = MemoryClient::new("aws-auth");
  let mut store = Store::new(client.clone());
  for username in ["cli-admin", "operator-admin"] {
    retry::apply(&mut store, &Intent::Add(mapping(ADMIN, username, &["system:masters"])), 3)
      .await
      .expect("add");
  }

  let intent = Intent::RemoveGrant(mapping(ADMIN, "operator-admin", &["system:masters"]));
  let outcome = retry::apply(&mut store, &intent, 3).await.expect("remove grant");
  assert_eq!(outcome, Outcome::Removed(Removal { removed: 1, remaining: 1 }));

  let saved = persisted(&client);
  let left = saved.get(&arn(ADMIN));
  assert_eq!(left.len(), 1);
  assert_eq!(left[0].username(), Some("cli-admin"));

  let err = retry::apply(&mut store, &intent, 3).await.expect_err("already removed");
  assert!(matches!(err, Error::NotFound { .. }));
}
