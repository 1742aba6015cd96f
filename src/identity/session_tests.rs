use std::collections::HashSet;

use super::*;
use crate::activity::{ActivityLog, MemoryActivityStore, NO_CURSOR};

fn store_with(ttl: Duration) -> (KvSessionStore, KvStore, Arc<MemoryActivityStore>) {
    let kv = KvStore::memory("sessions");
    let activity = Arc::new(MemoryActivityStore::new());
    let store = KvSessionStore::new(kv.clone(), activity.clone(), ttl);
    (store, kv, activity)
}

fn store() -> (KvSessionStore, KvStore, Arc<MemoryActivityStore>) { store_with(DEFAULT_SESSION_TTL) }

async fn logs(activity: &MemoryActivityStore, user: UserId) -> Vec<ActivityLog> {
    activity.by_user_id(user, NO_CURSOR, 100).await.unwrap()
}

struct BrokenAudit;

#[async_trait]
impl ActivityStore for BrokenAudit {
    async fn add_log(&self, _: UserId, _: Activity) -> Result<(), ActivityError> {
        Err(ActivityError::Storage("disk full".into()))
    }

    async fn by_user_id(&self, _: UserId, _: i64, _: i32) -> Result<Vec<crate::activity::ActivityLog>, ActivityError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn registered_session_round_trips() {
    let (store, kv, activity) = store();
    let user = UserId(42);
    let s = store.register_new(user, "10.0.0.1", "agent/1").await.unwrap();
    assert_eq!(s.user_id, user);
    assert_eq!(s.ip, "10.0.0.1");
    assert_eq!(s.user_agent, "agent/1");
    assert!(s.expires_at > s.last_accessed_at);

    assert_eq!(store.by_token(&s.token).unwrap(), s);
    assert!(store.exists(&s.token).unwrap());
    assert!(!store.exists("nope").unwrap());
    assert!(matches!(store.by_token("nope"), Err(SessionError::NotFound)));
    assert_eq!(kv.view(|tx| tx.get(&id_key(&s.id))).unwrap(), s.token);

    let created = logs(&activity, user).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, SESSION_CREATED);
    assert_eq!(created[0].data["session_id"], s.id.as_str());
    assert_eq!(created[0].data["ip"], "10.0.0.1");
    assert_eq!(created[0].data["userAgent"], "agent/1");
}

#[tokio::test]
async fn refresh_records_changes_and_slides_expiry() {
    let (store, _kv, activity) = store();
    let user = UserId(1);
    let s = store.register_new(user, "1.1.1.1", "ua-a").await.unwrap();

    let same = store.acquire_and_refresh(&s.token, "1.1.1.1", "ua-a").await.unwrap();
    assert!(same.expires_at >= s.expires_at);
    assert_eq!(logs(&activity, user).await.len(), 1, "no change, no audit entry");

    let moved = store.acquire_and_refresh(&s.token, "2.2.2.2", "ua-b").await.unwrap();
    assert_eq!(moved.id, s.id);
    assert_eq!(moved.token, s.token);
    assert_eq!(moved.ip, "2.2.2.2");
    assert_eq!(moved.user_agent, "ua-b");
    assert_eq!(store.by_token(&s.token).unwrap(), moved);

    let all = logs(&activity, user).await;
    let names: Vec<&str> = all.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec![SESSION_CHANGED_USER_AGENT, SESSION_CHANGED_IP, SESSION_CREATED]);
    assert_eq!(all[1].data["previous_ip"], "1.1.1.1");
    assert_eq!(all[1].data["new_ip"], "2.2.2.2");
    assert_eq!(all[0].data["previous_user_agent"], "ua-a");
    assert_eq!(all[0].data["new_user_agent"], "ua-b");

    assert!(matches!(store.acquire_and_refresh("missing", "x", "y").await, Err(SessionError::NotFound)));
}

#[tokio::test]
async fn single_field_changes_record_one_entry_each() {
    let (store, _kv, activity) = store();
    let user = UserId(3);
    let s = store.register_new(user, "1.1.1.1", "ua-a").await.unwrap();

    store.acquire_and_refresh(&s.token, "9.9.9.9", "ua-a").await.unwrap();
    let after_ip = logs(&activity, user).await;
    let names: Vec<&str> = after_ip.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec![SESSION_CHANGED_IP, SESSION_CREATED]);
    assert_eq!(after_ip[0].data["new_ip"], "9.9.9.9");

    store.acquire_and_refresh(&s.token, "9.9.9.9", "ua-z").await.unwrap();
    let after_ua = logs(&activity, user).await;
    let names: Vec<&str> = after_ua.iter().map(|l| l.name.as_str()).collect();
    assert_eq!(names, vec![SESSION_CHANGED_USER_AGENT, SESSION_CHANGED_IP, SESSION_CREATED]);
    assert_eq!(after_ua[0].data["previous_user_agent"], "ua-a");
    assert_eq!(after_ua[0].data["new_user_agent"], "ua-z");
}

#[tokio::test]
async fn failed_audit_writes_nothing() {
    let kv = KvStore::memory("sessions");
    let broken = KvSessionStore::new(kv.clone(), Arc::new(BrokenAudit), DEFAULT_SESSION_TTL);
    let err = broken.register_new(UserId(1), "ip", "ua").await.unwrap_err();
    assert!(matches!(err, SessionError::Activity(_)));
    assert!(kv.is_empty());

    // a session created elsewhere keeps its state when the refresh cannot be audited
    let working = KvSessionStore::new(kv.clone(), Arc::new(MemoryActivityStore::new()), DEFAULT_SESSION_TTL);
    let s = working.register_new(UserId(1), "ip", "ua").await.unwrap();
    assert!(broken.acquire_and_refresh(&s.token, "other-ip", "ua").await.is_err());
    assert_eq!(working.by_token(&s.token).unwrap(), s);
    // nothing to audit, so the refresh goes through
    assert!(broken.acquire_and_refresh(&s.token, "ip", "ua").await.is_ok());
}

#[tokio::test]
async fn both_indexes_are_removed_together() {
    let (store, kv, _) = store();
    let user = UserId(5);
    let a = store.register_new(user, "ip", "ua").await.unwrap();
    let b = store.register_new(user, "ip", "ua").await.unwrap();
    assert_eq!(kv.len(), 4);

    store.invalidate_by_id(user, &a.id).unwrap();
    assert!(!store.exists(&a.token).unwrap());
    assert!(matches!(kv.view(|tx| tx.get(&id_key(&a.id))), Err(KvError::NotFound)));

    store.invalidate_by_auth_token(&b.token).unwrap();
    assert!(kv.is_empty());

    assert!(matches!(store.invalidate_by_auth_token(&b.token), Err(SessionError::NotFound)));
    assert!(matches!(store.invalidate_by_id(user, &a.id), Err(SessionError::NotFound)));
}

#[tokio::test]
async fn foreign_session_cannot_be_revoked_by_id() {
    let (store, kv, _) = store();
    let owner = UserId(1);
    let s = store.register_new(owner, "ip", "ua").await.unwrap();

    let err = store.invalidate_by_id(UserId(2), &s.id).unwrap_err();
    match err {
        SessionError::WrongOwner { session_id, required, found } => {
            assert_eq!(session_id, s.id);
            assert_eq!(required, UserId(2));
            assert_eq!(found, owner);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.by_token(&s.token).unwrap(), s);
    assert_eq!(kv.len(), 2);
}

#[tokio::test]
async fn listing_and_bulk_revocation_stay_with_the_owner() {
    let (store, _kv, _) = store();
    let alice = UserId(1);
    let bob = UserId(2);
    let a1 = store.register_new(alice, "ip", "ua").await.unwrap();
    let a2 = store.register_new(alice, "ip", "ua").await.unwrap();
    let a3 = store.register_new(alice, "ip", "ua").await.unwrap();
    let b1 = store.register_new(bob, "ip", "ua").await.unwrap();

    let listed: HashSet<String> = store.active_sessions(&a2.token).unwrap().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, HashSet::from([a1.id.clone(), a2.id.clone(), a3.id.clone()]));
    assert_eq!(store.active_sessions(&b1.token).unwrap().len(), 1);
    assert!(matches!(store.active_sessions("gone"), Err(SessionError::NotFound)));

    assert_eq!(store.invalidate_all_except(&a2.token).unwrap(), 2);
    let left = store.active_sessions(&a2.token).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, a2.id);
    assert!(store.exists(&b1.token).unwrap());
    assert!(!store.exists(&a1.token).unwrap());
    assert!(matches!(store.invalidate_by_id(alice, &a3.id), Err(SessionError::NotFound)));
}

#[tokio::test]
async fn revocation_survives_a_missing_id_index() {
    let (store, kv, _) = store();
    let user = UserId(9);
    let keep = store.register_new(user, "ip", "ua").await.unwrap();
    let stale = store.register_new(user, "ip", "ua").await.unwrap();
    let other = store.register_new(user, "ip", "ua").await.unwrap();
    kv.update(|tx| tx.delete(&id_key(&stale.id))).unwrap();

    assert_eq!(store.invalidate_all_except(&keep.token).unwrap(), 2);
    assert!(!store.exists(&stale.token).unwrap());
    assert!(!store.exists(&other.token).unwrap());
    assert!(matches!(kv.view(|tx| tx.get(&id_key(&other.id))), Err(KvError::NotFound)));
    assert_eq!(kv.len(), 2);

    kv.update(|tx| tx.delete(&id_key(&keep.id))).unwrap();
    store.invalidate_by_auth_token(&keep.token).unwrap();
    assert!(kv.is_empty());
}

#[tokio::test]
async fn sessions_expire_with_their_ttl() {
    let (store, kv, _) = store_with(Duration::from_millis(30));
    let s = store.register_new(UserId(1), "ip", "ua").await.unwrap();
    assert!(store.exists(&s.token).unwrap());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!store.exists(&s.token).unwrap());
    assert!(matches!(store.by_token(&s.token), Err(SessionError::NotFound)));
    assert!(matches!(kv.view(|tx| tx.get(&id_key(&s.id))), Err(KvError::NotFound)));
    assert_eq!(kv.sweep(), 2);
}

#[test]
fn tokens_are_long_unique_and_key_safe() {
    let mut seen = HashSet::new();
    for _ in 0..10_000 {
        let t = generate_session_token().unwrap();
        assert!(t.len() >= 20);
        assert!(!t.contains(':'));
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(seen.insert(t), "duplicate token");
    }
}
