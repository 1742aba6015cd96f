use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::activity::{Activity, ActivityError, ActivityLog, ActivityStore, MemoryActivityStore};
use crate::identity::{ExternalIdentity, LinkedIdentity, User, UserId, UserStore};
use super::{DirectoryError, Profile, ProfileStore, Program, ProgramFile, ProgramStore};

#[derive(Default)]
struct State {
    last_user_id: i64,
    last_profile_id: i64,
    last_program_id: i64,
    users: HashMap<UserId, User>,
    by_external: HashMap<String, UserId>,
    profiles: HashMap<UserId, Profile>,
    programs: Vec<Program>,
}

/// Process-local directory. Used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryDirectory {
    state: RwLock<State>,
    activity: MemoryActivityStore,
}

impl MemoryDirectory {
    pub fn new() -> Self { Self::default() }

    /// Publish a build. The id is assigned here, so later calls win lookups.
    pub fn publish_program(&self, file_type: &str, os: &str, arch: &str, branch: &str, files: Vec<ProgramFile>) -> i64 {
        let mut st = self.state.write();
        st.last_program_id += 1;
        let id = st.last_program_id;
        st.programs.push(Program {
            id,
            file_type: file_type.to_string(),
            os: os.to_string(),
            arch: arch.to_string(),
            branch: branch.to_string(),
            files,
        });
        id
    }
}

#[async_trait]
impl UserStore for MemoryDirectory {
    async fn register_or_update(&self, identity: &ExternalIdentity, refresh_token: &str) -> Result<User, DirectoryError> {
        let mut guard = self.state.write();
        let st = &mut *guard;
        let email = identity.email.clone().unwrap_or_default();
        let existing = st.by_external.get(&identity.id).copied();
        let user_id = match existing {
            Some(id) => {
                let user = st.users.get_mut(&id).ok_or(DirectoryError::UserNotFound)?;
                user.email = email;
                user.linked.refresh_token = refresh_token.to_string();
                id
            }
            None => {
                st.last_user_id += 1;
                let id = UserId(st.last_user_id);
                let user = User {
                    id,
                    created_at: Utc::now(),
                    role_ids: Vec::new(),
                    linked: LinkedIdentity { id: identity.id.clone(), refresh_token: refresh_token.to_string() },
                    email,
                };
                st.users.insert(id, user);
                st.by_external.insert(identity.id.clone(), id);
                id
            }
        };

        let name = identity.username.clone();
        let avatar_url = identity.avatar_url();
        if let Some(p) = st.profiles.get_mut(&user_id) {
            p.name = name;
            p.avatar_url = avatar_url;
        } else {
            st.last_profile_id += 1;
            let id = st.last_profile_id;
            st.profiles.insert(user_id, Profile { id, user_id, name, avatar_url });
        }

        st.users.get(&user_id).cloned().ok_or(DirectoryError::UserNotFound)
    }

    async fn by_id(&self, id: UserId) -> Result<User, DirectoryError> {
        self.state.read().users.get(&id).cloned().ok_or(DirectoryError::UserNotFound)
    }

    async fn update(&self, user: &User) -> Result<(), DirectoryError> {
        let mut st = self.state.write();
        let slot = st.users.get_mut(&user.id).ok_or(DirectoryError::UserNotFound)?;
        *slot = user.clone();
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryDirectory {
    async fn by_user_id(&self, user_id: UserId) -> Result<Profile, DirectoryError> {
        self.state.read().profiles.get(&user_id).cloned().ok_or(DirectoryError::ProfileNotFound)
    }
}

#[async_trait]
impl ProgramStore for MemoryDirectory {
    async fn latest_program_files(&self, file_type: &str, os: &str, arch: &str, branch: &str) -> Result<Vec<ProgramFile>, DirectoryError> {
        self.state
            .read()
            .programs
            .iter()
            .filter(|p| p.matches(file_type, os, arch, branch))
            .max_by_key(|p| p.id)
            .map(|p| p.files.clone())
            .ok_or(DirectoryError::ProgramNotFound)
    }
}

#[async_trait]
impl ActivityStore for MemoryDirectory {
    async fn add_log(&self, user_id: UserId, activity: Activity) -> Result<(), ActivityError> {
        self.activity.add_log(user_id, activity).await
    }

    async fn by_user_id(&self, user_id: UserId, before_id: i64, limit: i32) -> Result<Vec<ActivityLog>, ActivityError> {
        self.activity.by_user_id(user_id, before_id, limit).await
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod memory_tests;
