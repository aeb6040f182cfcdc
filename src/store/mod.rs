//! Record store for users, projects and image records.
//!
//! Components receive an `Arc<dyn RecordStore>` explicitly; there is no
//! global client.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ImageRecord, NewImage, Project, User};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Record store failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_user(&self, name: &str, email: &str) -> Result<User, StoreError>;

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    async fn create_project(&self, user_id: &str, name: &str) -> Result<Project, StoreError>;

    async fn find_project(&self, user_id: &str, name: &str) -> Result<Option<Project>, StoreError>;

    async fn create_image(&self, image: NewImage) -> Result<ImageRecord, StoreError>;
}

/// Process-local store kept in memory.
#[derive(Default)]
pub struct InMemoryRecordStore {
    users: RwLock<HashMap<String, User>>,
    // keyed by (user id, project name)
    projects: RwLock<HashMap<(String, String), Project>>,
    images: RwLock<HashMap<String, ImageRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn images(&self) -> Vec<ImageRecord> {
        self.images.read().values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_user(&self, name: &str, email: &str) -> Result<User, StoreError> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            created_at: Utc::now(),
        };
        self.users.write().insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn create_project(&self, user_id: &str, name: &str) -> Result<Project, StoreError> {
        let mut projects = self.projects.write();
        let key = (user_id.to_string(), name.to_string());
        if projects.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "project '{}' already exists for user {}",
                name, user_id
            )));
        }

        let project = Project {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        projects.insert(key, project.clone());
        Ok(project)
    }

    async fn find_project(&self, user_id: &str, name: &str) -> Result<Option<Project>, StoreError> {
        let key = (user_id.to_string(), name.to_string());
        Ok(self.projects.read().get(&key).cloned())
    }

    async fn create_image(&self, image: NewImage) -> Result<ImageRecord, StoreError> {
        let record = ImageRecord {
            id: Uuid::new_v4().to_string(),
            file_name: image.file_name,
            file_path: image.file_path,
            user_id: image.user_id,
            project_id: image.project_id,
            created_at: Utc::now(),
        };
        self.images.write().insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn users_and_projects_round_trip() {
        let store = InMemoryRecordStore::new();
        let user = store.create_user("Ada", "ada@example.com").await.unwrap();

        assert_eq!(store.find_user(&user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(store.find_user("missing").await.unwrap(), None);

        let project = store.create_project(&user.id, "blog").await.unwrap();
        assert_eq!(
            store.find_project(&user.id, "blog").await.unwrap(),
            Some(project)
        );
        assert_eq!(store.find_project("other", "blog").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_project_is_rejected() {
        let store = InMemoryRecordStore::new();
        store.create_project("u", "blog").await.unwrap();
        assert!(matches!(
            store.create_project("u", "blog").await,
            Err(StoreError::Duplicate(_))
        ));
        assert!(store.create_project("v", "blog").await.is_ok());
    }
}
