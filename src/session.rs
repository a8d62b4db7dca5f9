//! Session gate: bearer token lifecycle, hierarchy refresh and logout wipe

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::api::RemoteApi;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Plant, User};

pub const TOKEN_KEY: &str = "user_token";
pub const USER_KEY: &str = "user_data";

/// Key-value persistence for the bearer token and cached user profile
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

impl CredentialStore for Database {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value)
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.delete_value(key)
    }
}

/// Credentials that live only as long as the process
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| Error::PersistenceError("credential lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.values()?.remove(key);
        Ok(())
    }
}

/// Current bearer token; an empty value counts as absent
pub(crate) fn read_token(credentials: &dyn CredentialStore) -> Result<Option<String>> {
    Ok(credentials
        .get(TOKEN_KEY)?
        .filter(|token| !token.is_empty()))
}

/// Holds the session and is the only entry point for login, logout and
/// hierarchy refresh.
pub struct Session<A> {
    api: Arc<A>,
    db: Arc<Database>,
    credentials: Arc<dyn CredentialStore>,
    refresh_lock: AsyncMutex<()>,
}

impl<A: RemoteApi> Session<A> {
    pub fn new(api: Arc<A>, db: Arc<Database>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            api,
            db,
            credentials,
            refresh_lock: AsyncMutex::new(()),
        }
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.credentials
    }

    pub fn token(&self) -> Result<Option<String>> {
        read_token(self.credentials.as_ref())
    }

    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(self.token()?.is_some())
    }

    /// The profile cached at login
    pub fn current_user(&self) -> Result<Option<User>> {
        match self.credentials.get(USER_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Log in and pull the hierarchy.
    ///
    /// The follow-up refresh is best-effort: if it fails the login still
    /// succeeds and the caller can retry with [`Session::refresh_hierarchy`].
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::ValidationError(
                "Email and password are required".to_string(),
            ));
        }

        let data = self.api.login(email.trim(), password).await?;

        self.credentials.set(TOKEN_KEY, &data.token)?;
        self.credentials
            .set(USER_KEY, &serde_json::to_string(&data.user)?)?;

        tracing::info!(user = %data.user.email, "Logged in");

        if let Err(e) = self.refresh_hierarchy().await {
            tracing::warn!(error = %e, "Hierarchy fetch after login failed");
        }

        Ok(data.user)
    }

    /// Log out and wipe every piece of account-scoped local state.
    ///
    /// The remote call's outcome is logged but does not block the local wipe;
    /// a different account may log in next.
    pub async fn logout(&self) -> Result<()> {
        let token = self.token()?.ok_or(Error::Unauthenticated)?;

        if let Err(e) = self.api.logout(&token).await {
            tracing::warn!(error = %e, "Remote logout failed, clearing local session anyway");
        }

        self.credentials.clear(TOKEN_KEY)?;
        self.credentials.clear(USER_KEY)?;

        // Wait out any refresh still writing before wiping.
        let _guard = self.refresh_lock.lock().await;
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.clear_hierarchy()).await??;

        tracing::info!("Logged out, local hierarchy cleared");
        Ok(())
    }

    /// Fetch the hierarchy and merge it into the local store.
    ///
    /// Returns the number of plants received. Concurrent calls queue behind
    /// each other. If the fetch fails the store is left untouched.
    pub async fn refresh_hierarchy(&self) -> Result<usize> {
        let _guard = self.refresh_lock.lock().await;

        let token = self.token()?;
        let plants = match self.api.fetch_hierarchy(token.as_deref()).await {
            Ok(plants) => plants,
            Err(e) => {
                tracing::error!(error = %e, connectivity = e.is_connectivity(), "Hierarchy fetch failed");
                return Err(e);
            }
        };

        let count = plants.len();
        if count == 0 {
            tracing::warn!("Hierarchy response was empty, nothing to store");
            return Ok(0);
        }

        // Once started, the write runs to completion even if this future is
        // dropped.
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.upsert_hierarchy(&plants)).await??;

        tracing::info!(plants = count, "Hierarchy refreshed");
        Ok(count)
    }

    /// The locally stored hierarchy
    pub async fn load_hierarchy(&self) -> Result<Vec<Plant>> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.load_hierarchy()).await?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        Area, CannotPatrolReport, EquipmentGroup, EquipmentType, FormType, LoginData, Parameter,
        Tag,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable stand-in for the remote API
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub hierarchy: Mutex<Option<Vec<Plant>>>,
        pub fail_fetch_with: Mutex<Option<u16>>,
        pub fail_submit_with: Mutex<Option<u16>>,
        pub submit_delay: Mutex<Option<std::time::Duration>>,
        pub fail_logout: Mutex<bool>,
        pub fetch_calls: AtomicUsize,
        pub submitted: Mutex<Vec<CannotPatrolReport>>,
    }

    impl FakeApi {
        pub fn with_hierarchy(plants: Vec<Plant>) -> Self {
            let api = Self::default();
            *api.hierarchy.lock().unwrap() = Some(plants);
            api
        }

        pub fn set_hierarchy(&self, plants: Vec<Plant>) {
            *self.hierarchy.lock().unwrap() = Some(plants);
        }

        pub fn fail_fetch(&self, status: Option<u16>) {
            *self.fail_fetch_with.lock().unwrap() = status;
        }

        pub fn fail_submit(&self, status: Option<u16>) {
            *self.fail_submit_with.lock().unwrap() = status;
        }
    }

    pub(crate) fn user() -> User {
        User {
            id: 7,
            name: "Sari".into(),
            email: "sari@example.com".into(),
            department: "Production".into(),
            role: "Patroller".into(),
            is_active: true,
            sequential_checklist: false,
            conditional_sync: false,
            multiple_patrol: true,
        }
    }

    impl RemoteApi for FakeApi {
        async fn login(&self, email: &str, password: &str) -> Result<LoginData> {
            if password != "secret" {
                return Err(Error::Unauthorized("Invalid credentials".into()));
            }
            let mut user = user();
            user.email = email.to_string();
            Ok(LoginData {
                token: "token-123".into(),
                token_type: Some("Bearer".into()),
                user,
            })
        }

        async fn logout(&self, _token: &str) -> Result<()> {
            if *self.fail_logout.lock().unwrap() {
                Err(Error::ServerError(500))
            } else {
                Ok(())
            }
        }

        async fn fetch_hierarchy(&self, token: Option<&str>) -> Result<Vec<Plant>> {
            token.ok_or(Error::Unauthenticated)?;
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(code) = *self.fail_fetch_with.lock().unwrap() {
                return Err(Error::ServerError(code));
            }
            Ok(self.hierarchy.lock().unwrap().clone().unwrap_or_default())
        }

        async fn submit_report(&self, _token: &str, report: &CannotPatrolReport) -> Result<String> {
            let delay = *self.submit_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(code) = *self.fail_submit_with.lock().unwrap() {
                return Err(Error::ServerError(code));
            }
            self.submitted.lock().unwrap().push(report.clone());
            Ok("Data berhasil disimpan".into())
        }
    }

    pub(crate) fn tree(plant_name: &str) -> Vec<Plant> {
        let mut plant = Plant {
            plant_id: 1,
            name: plant_name.into(),
            areas: vec![Area {
                area_id: 1,
                name: "Turbine Hall".into(),
                plant_id: 0,
                groups: vec![EquipmentGroup {
                    group_id: 1,
                    name: "Rotating".into(),
                    area_id: 0,
                    types: vec![EquipmentType {
                        type_id: 1,
                        name: "Compressor".into(),
                        group_id: 0,
                        tags: vec![Tag {
                            tag_id: 1,
                            name: "K-201".into(),
                            type_id: 0,
                            parameters: vec![Parameter {
                                param_id: 1,
                                name: "Discharge pressure".into(),
                                unit: "bar".into(),
                                form_type: FormType::Range,
                                boolean_options: String::new(),
                                correct_option: String::new(),
                                gap: "0.5".into(),
                                mandatory: true,
                                min: Some(4),
                                max: Some(6),
                                ordering: 1,
                                tag_id: 0,
                            }],
                        }],
                    }],
                }],
            }],
        };
        plant.link_parents();
        vec![plant]
    }

    fn session(api: FakeApi) -> Session<FakeApi> {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let credentials: Arc<dyn CredentialStore> = db.clone();
        Session::new(Arc::new(api), db, credentials)
    }

    #[tokio::test]
    async fn login_stores_token_and_fetches_hierarchy() {
        let session = session(FakeApi::with_hierarchy(tree("North")));

        let user = session.login("sari@example.com", "secret").await.unwrap();
        assert_eq!(user.email, "sari@example.com");
        assert_eq!(session.token().unwrap().as_deref(), Some("token-123"));
        assert_eq!(session.current_user().unwrap(), Some(user));
        assert_eq!(session.load_hierarchy().await.unwrap(), tree("North"));
    }

    #[tokio::test]
    async fn login_survives_failed_hierarchy_fetch() {
        let api = FakeApi::default();
        api.fail_fetch(Some(500));
        let session = session(api);

        session.login("sari@example.com", "secret").await.unwrap();
        assert!(session.is_authenticated().unwrap());
        assert!(session.load_hierarchy().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_login_leaves_no_token() {
        let session = session(FakeApi::default());
        let err = session.login("sari@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(msg) if msg == "Invalid credentials"));
        assert!(!session.is_authenticated().unwrap());
    }

    #[tokio::test]
    async fn login_requires_credentials() {
        let session = session(FakeApi::default());
        assert!(matches!(
            session.login("  ", "secret").await,
            Err(Error::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn logout_wipes_hierarchy_and_credentials() {
        let session = session(FakeApi::with_hierarchy(tree("North")));
        session.login("sari@example.com", "secret").await.unwrap();
        assert_eq!(session.load_hierarchy().await.unwrap().len(), 1);

        session.logout().await.unwrap();

        assert!(session.load_hierarchy().await.unwrap().is_empty());
        assert_eq!(session.database().hierarchy_counts().unwrap().total(), 0);
        assert!(!session.is_authenticated().unwrap());
        assert_eq!(session.current_user().unwrap(), None);
    }

    #[tokio::test]
    async fn logout_wipes_even_when_remote_call_fails() {
        let api = FakeApi::with_hierarchy(tree("North"));
        *api.fail_logout.lock().unwrap() = true;
        let session = session(api);
        session.login("sari@example.com", "secret").await.unwrap();

        session.logout().await.unwrap();
        assert!(session.load_hierarchy().await.unwrap().is_empty());
        assert!(!session.is_authenticated().unwrap());
    }

    #[tokio::test]
    async fn logout_without_token_is_unauthenticated() {
        let session = session(FakeApi::default());
        assert!(matches!(session.logout().await, Err(Error::Unauthenticated)));
    }

    #[tokio::test]
    async fn refresh_without_token_is_unauthenticated() {
        let session = session(FakeApi::with_hierarchy(tree("North")));
        assert!(matches!(
            session.refresh_hierarchy().await,
            Err(Error::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_data() {
        let session = session(FakeApi::with_hierarchy(tree("North")));
        session.login("sari@example.com", "secret").await.unwrap();
        let before = session.load_hierarchy().await.unwrap();

        session.api().set_hierarchy(tree("Renamed"));
        session.api().fail_fetch(Some(500));
        assert!(matches!(
            session.refresh_hierarchy().await,
            Err(Error::ServerError(500))
        ));

        assert_eq!(session.load_hierarchy().await.unwrap(), before);
    }

    #[tokio::test]
    async fn refresh_updates_names_in_place() {
        let session = session(FakeApi::with_hierarchy(tree("North")));
        session.login("sari@example.com", "secret").await.unwrap();
        let counts = session.database().hierarchy_counts().unwrap();

        session.api().set_hierarchy(tree("North Site"));
        assert_eq!(session.refresh_hierarchy().await.unwrap(), 1);

        let loaded = session.load_hierarchy().await.unwrap();
        assert_eq!(loaded[0].name, "North Site");
        assert_eq!(session.database().hierarchy_counts().unwrap(), counts);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_do_not_duplicate_rows() {
        let session = Arc::new(session(FakeApi::with_hierarchy(tree("North"))));
        session.login("sari@example.com", "secret").await.unwrap();
        let counts = session.database().hierarchy_counts().unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let session = Arc::clone(&session);
                tokio::spawn(async move { session.refresh_hierarchy().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(session.database().hierarchy_counts().unwrap(), counts);
        assert_eq!(session.api().fetch_calls.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn memory_credentials_treat_empty_token_as_absent() {
        let creds = MemoryCredentials::new();
        creds.set(TOKEN_KEY, "").unwrap();
        assert_eq!(read_token(&creds).unwrap(), None);
        creds.set(TOKEN_KEY, "abc").unwrap();
        assert_eq!(read_token(&creds).unwrap().as_deref(), Some("abc"));
        creds.clear(TOKEN_KEY).unwrap();
        assert_eq!(read_token(&creds).unwrap(), None);
    }
}
