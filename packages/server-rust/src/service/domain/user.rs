//! User accounts: registration, lookup and login with JWT issuance.

use std::time::Duration;

use jsonwebtoken::{EncodingKey, Header};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use storefront_core::ids::unix_millis;
use storefront_core::model::{
    GetUserRequest, GetUserResponse, LoginRequest, LoginResponse, RegisterRequest,
    RegisterResponse, UserAuthority,
};
use storefront_core::{BusinessError, Reply};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::service::config::DomainConfig;
use crate::service::middleware::LogFields;
use crate::storage::{SharedStore, Stores, UserRecord};

/// Claims carried by a login token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Issued at, Unix seconds.
    pub iat: u64,
    /// Expiry, Unix seconds.
    pub exp: u64,
}

pub struct UserService {
    users: SharedStore<UserRecord>,
    signing_key: EncodingKey,
    token_ttl: Duration,
}

impl UserService {
    #[must_use]
    pub fn new(stores: &Stores, config: &DomainConfig) -> Self {
        Self {
            users: stores.users.clone(),
            signing_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            token_ttl: config.token_ttl,
        }
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn get_user(&self, req: GetUserRequest) -> anyhow::Result<Reply<GetUserResponse>> {
        Ok(match self.users.get(&req.id)? {
            Some(record) => Reply::ok(GetUserResponse { v: record.to_user() }),
            None => Reply::fail(BusinessError::UserNotFound),
        })
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub fn register(&self, req: RegisterRequest) -> anyhow::Result<Reply<RegisterResponse>> {
        for (field, value) in [
            ("FirstName", &req.first_name),
            ("LastName", &req.last_name),
            ("Username", &req.username),
            ("Password", &req.password),
        ] {
            if value.is_empty() {
                return Ok(Reply::fail(BusinessError::MissingField(field.to_string())));
            }
        }
        let salt = new_salt();
        let record = UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            username: req.username,
            password_hash: password_hash(&salt, &req.password),
            salt,
            email: req.email,
            first_name: req.first_name,
            last_name: req.last_name,
            authority: UserAuthority::Customer,
        };
        let id = record.id.clone();
        let username = record.username.clone();
        if !self.users.insert_unique(record, "username")? {
            return Ok(Reply::fail(BusinessError::UserAlreadyExisting));
        }
        info!(id = %id, username = %username, "user registered");
        Ok(Reply::ok(RegisterResponse { id }))
    }

    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the token cannot be signed.
    pub fn login(&self, req: LoginRequest) -> anyhow::Result<Reply<LoginResponse>> {
        let Some(record) = self.users.find_one("username", &json!(req.username))? else {
            return Ok(Reply::fail(BusinessError::Unauthorized));
        };
        let candidate = password_hash(&record.salt, &req.password);
        if !bool::from(candidate.as_bytes().ct_eq(record.password_hash.as_bytes())) {
            return Ok(Reply::fail(BusinessError::Unauthorized));
        }

        let iat = unix_millis() / 1000;
        let claims = Claims {
            sub: record.id.clone(),
            iat,
            exp: iat + self.token_ttl.as_secs(),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.signing_key)?;
        Ok(Reply::ok(LoginResponse {
            user: record.to_user(),
            token,
        }))
    }
}

fn new_salt() -> String {
    let mut salt = [0_u8; 16];
    rand::rng().fill_bytes(&mut salt);
    hex::encode(salt)
}

/// `hex(sha256(salt || password))`.
fn password_hash(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl LogFields for GetUserRequest {
    fn log_fields(&self) -> String {
        format!("id={}", self.id)
    }
}

impl LogFields for RegisterRequest {
    fn log_fields(&self) -> String {
        format!("username={}", self.username)
    }
}

impl LogFields for LoginRequest {
    fn log_fields(&self) -> String {
        format!("username={}", self.username)
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation};

    use super::*;
    use crate::storage::{open, StorageConfig};

    fn service() -> (UserService, Stores) {
        let stores = open(&StorageConfig::default()).unwrap();
        (UserService::new(&stores, &DomainConfig::default()), stores)
    }

    #[test]
    fn concurrent_registrations_of_one_username_admit_one() {
        let (service, stores) = service();
        let barrier = std::sync::Barrier::new(8);
        let admitted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        service.register(ann()).unwrap().is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });
        assert_eq!(admitted, 1);
        assert_eq!(stores.users.len(), 1);
    }

    fn ann() -> RegisterRequest {
        RegisterRequest {
            username: "ann".to_string(),
            password: "hunter2".to_string(),
            email: "ann@example.com".to_string(),
            first_name: "Ann".to_string(),
            last_name: "Lee".to_string(),
        }
    }

    #[test]
    fn register_then_get() {
        let (svc, stores) = service();
        let id = svc.register(ann()).unwrap().into_result().unwrap().id;

        let stored = stores.users.get(&id).unwrap().unwrap();
        assert_ne!(stored.password_hash, "hunter2");
        assert_eq!(stored.password_hash, password_hash(&stored.salt, "hunter2"));

        let user = svc
            .get_user(GetUserRequest { id: id.clone() })
            .unwrap()
            .into_result()
            .unwrap()
            .v;
        assert_eq!(user.id, id);
        assert_eq!(user.authority, UserAuthority::Customer);
    }

    #[test]
    fn register_validates_fields_in_order() {
        let (svc, _) = service();
        let reply = svc
            .register(RegisterRequest {
                first_name: String::new(),
                password: String::new(),
                ..ann()
            })
            .unwrap();
        assert_eq!(
            reply.error(),
            Some(&BusinessError::MissingField("FirstName".to_string()))
        );
        let reply = svc
            .register(RegisterRequest {
                password: String::new(),
                ..ann()
            })
            .unwrap();
        assert_eq!(reply.error().unwrap().to_string(), "Error missing Password");
    }

    #[test]
    fn duplicate_username_conflicts() {
        let (svc, stores) = service();
        assert!(svc.register(ann()).unwrap().is_ok());
        let again = svc.register(ann()).unwrap();
        assert_eq!(again.error(), Some(&BusinessError::UserAlreadyExisting));
        assert_eq!(stores.users.len(), 1);
    }

    #[test]
    fn salts_differ_per_user() {
        let (svc, stores) = service();
        let a = svc.register(ann()).unwrap().into_result().unwrap().id;
        let b = svc
            .register(RegisterRequest {
                username: "bob".to_string(),
                ..ann()
            })
            .unwrap()
            .into_result()
            .unwrap()
            .id;
        let a = stores.users.get(&a).unwrap().unwrap();
        let b = stores.users.get(&b).unwrap().unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.password_hash, b.password_hash);
    }

    #[test]
    fn unknown_user_get_is_not_found() {
        let (svc, _) = service();
        let reply = svc
            .get_user(GetUserRequest {
                id: "nobody".to_string(),
            })
            .unwrap();
        assert_eq!(reply.error(), Some(&BusinessError::UserNotFound));
    }

    #[test]
    fn login_issues_a_verifiable_token() {
        let (svc, _) = service();
        let id = svc.register(ann()).unwrap().into_result().unwrap().id;

        let login = svc
            .login(LoginRequest {
                username: "ann".to_string(),
                password: "hunter2".to_string(),
            })
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(login.user.id, id);

        let decoded = jsonwebtoken::decode::<Claims>(
            &login.token,
            &DecodingKey::from_secret(DomainConfig::default().jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, id);
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 3600);
    }

    #[test]
    fn wrong_password_and_unknown_user_are_unauthorized() {
        let (svc, _) = service();
        svc.register(ann()).unwrap();
        for (username, password) in [("ann", "wrong"), ("cy", "hunter2")] {
            let reply = svc
                .login(LoginRequest {
                    username: username.to_string(),
                    password: password.to_string(),
                })
                .unwrap();
            assert_eq!(reply.error(), Some(&BusinessError::Unauthorized));
        }
    }
}
