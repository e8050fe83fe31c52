use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bcrypt::DEFAULT_COST;
use log::{debug, info, warn};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::context::Caller;
use crate::error::{ChatError, StoreError};
use crate::models::{User, UserInfo};
use crate::store::ChatStore;

const TOKEN_LEN: usize = 15;

/// API key pair handed out by signup and login. The secret is only ever shown here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub message: String,
    pub api_key: String,
    pub api_secret: String,
    pub full_name: String,
    pub email: String,
}

pub struct Accounts {
    store: Arc<dyn ChatStore>,
    password_cost: u32,
}

impl Accounts {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self {
            store,
            password_cost: DEFAULT_COST,
        }
    }

    /// bcrypt work factor for newly stored passwords. Existing hashes keep their own cost.
    pub fn with_password_cost(mut self, cost: u32) -> Self {
        self.password_cost = cost;
        self
    }

    /// # Errors
    ///
    /// `Validation` for a malformed email, password or name, `AlreadyExists` when the email
    /// is taken, `Store` when hashing or the store fails.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<Credentials, ChatError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(ChatError::Validation(
                "A valid email is required".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(ChatError::Validation("Password is required".to_string()));
        }
        if full_name.trim().is_empty() {
            return Err(ChatError::Validation("Full name is required".to_string()));
        }
        if self.store.user(email).await?.is_some() {
            return Err(ChatError::AlreadyExists("User already exists".to_string()));
        }

        let mut user = User {
            name: email.to_string(),
            full_name: full_name.trim().to_string(),
            email: email.to_string(),
            enabled: true,
            password_hash: hash_password(password, self.password_cost).await?,
            api_key: None,
            api_secret_hash: None,
        };
        let api_secret = issue_keys(&mut user);

        match self.store.insert_user(user.clone()).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(ChatError::AlreadyExists("User already exists".to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        info!("User created: {}", user.name);

        Ok(credentials("User Created", &user, api_secret))
    }

    /// Checks the password and rotates the API secret. The key is kept if one exists.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for an unknown or disabled user and for a wrong password.
    pub async fn login(&self, usr: &str, pwd: &str) -> Result<Credentials, ChatError> {
        let verified = match self.store.user(usr.trim()).await? {
            Some(user) if user.enabled => {
                let valid = verify_password(pwd, &user.password_hash).await;
                valid.then_some(user)
            }
            _ => None,
        };
        let Some(mut user) = verified else {
            debug!("Login rejected for {usr}");
            return Err(ChatError::InvalidCredentials);
        };

        let api_secret = issue_keys(&mut user);
        self.store.update_user(user.clone()).await?;
        info!("Login successful for: {}", user.name);

        Ok(credentials("Logged In", &user, api_secret))
    }

    /// Resolves an `Authorization: token <api_key>:<api_secret>` header. Anything that
    /// does not check out is treated as a guest.
    pub async fn authenticate(&self, header: Option<&str>) -> Caller {
        let Some((api_key, api_secret)) = header.and_then(parse_token) else {
            return Caller::Guest;
        };

        match self.store.user_by_api_key(api_key).await {
            Ok(Some(user)) if user.enabled && secret_matches(&user, api_secret) => {
                Caller::User(user.name)
            }
            Ok(_) => Caller::Guest,
            Err(e) => {
                debug!("Token lookup failed: {e}");
                Caller::Guest
            }
        }
    }

    /// Enabled users other than `caller`, by name.
    ///
    /// # Errors
    ///
    /// `Store` when the user table cannot be read.
    pub async fn list_users(&self, caller: &str) -> Result<Vec<UserInfo>, ChatError> {
        let users = self.store.users().await?;
        Ok(users
            .iter()
            .filter(|user| user.enabled && user.name != caller)
            .map(UserInfo::from)
            .collect())
    }
}

fn credentials(message: &str, user: &User, api_secret: String) -> Credentials {
    Credentials {
        message: message.to_string(),
        api_key: user.api_key.clone().unwrap_or_default(),
        api_secret,
        full_name: user.full_name.clone(),
        email: user.email.clone(),
    }
}

/// Gives `user` an API key if missing and a fresh secret, returning the plain secret.
fn issue_keys(user: &mut User) -> String {
    if user.api_key.is_none() {
        user.api_key = Some(generate_token());
    }
    let secret = generate_token();
    user.api_secret_hash = Some(digest(&secret));
    secret
}

fn secret_matches(user: &User, api_secret: &str) -> bool {
    user.api_secret_hash.as_deref().is_some_and(|stored| {
        stored
            .as_bytes()
            .ct_eq(digest(api_secret).as_bytes())
            .into()
    })
}

fn parse_token(header: &str) -> Option<(&str, &str)> {
    let token = header.trim().strip_prefix("token ")?;
    let (key, secret) = token.trim().split_once(':')?;
    if key.is_empty() || secret.is_empty() {
        return None;
    }
    Some((key, secret))
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// API secrets are random 15-char tokens, so a fast digest is enough for them.
fn digest(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    BASE64.encode(hasher.finalize())
}

async fn hash_password(password: &str, cost: u32) -> Result<String, ChatError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ChatError::Store(format!("Password hashing task failed: {e}")))?
        .map_err(|e| ChatError::Store(format!("Failed to hash password: {e}")))
}

async fn verify_password(password: &str, stored: &str) -> bool {
    let (password, stored) = (password.to_owned(), stored.to_owned());
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &stored)).await {
        Ok(Ok(valid)) => valid,
        Ok(Err(e)) => {
            debug!("Unreadable password hash: {e}");
            false
        }
        Err(e) => {
            warn!("Password check task failed: {e}");
            false
        }
    }
}
