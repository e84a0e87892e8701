use serde::{Deserialize, Serialize};

/// Role of a user account, encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum UserAuthority {
    #[default]
    Unknown,
    Customer,
    Tenant,
    Admin,
}

impl From<UserAuthority> for u8 {
    fn from(authority: UserAuthority) -> Self {
        match authority {
            UserAuthority::Unknown => 0,
            UserAuthority::Customer => 1,
            UserAuthority::Tenant => 2,
            UserAuthority::Admin => 3,
        }
    }
}

impl TryFrom<u8> for UserAuthority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Customer),
            2 => Ok(Self::Tenant),
            3 => Ok(Self::Admin),
            other => Err(format!("unknown user authority {other}")),
        }
    }
}

/// Public view of a user account. Credentials and contact data stay server side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub authority: UserAuthority,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetUserRequest {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetUserResponse {
    pub v: User,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegisterResponse {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn authority_is_an_integer() {
        let user = User {
            authority: UserAuthority::Tenant,
            ..User::default()
        };
        assert_eq!(serde_json::to_value(&user).unwrap()["authority"], json!(2));
    }

    #[test]
    fn unknown_authority_is_rejected() {
        let result: Result<User, _> = serde_json::from_value(json!({ "authority": 9 }));
        assert!(result.is_err());
    }
}
