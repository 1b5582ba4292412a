//! Session identity: the current user, login and logout.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache_key;
use crate::error::{QueryError, Result};
use crate::key::CacheKey;
use crate::mutation::{Mutation, Seed};
use crate::query::QueryResult;
use crate::transport::{ApiRequest, Transport, fetch_json};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl User {
    /// First and last name, falling back to the email when both are blank.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_string()
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// # Errors
    ///
    /// Returns [`QueryError::Validation`] for a malformed email or a password
    /// shorter than six characters.
    pub fn validate(&self) -> Result<()> {
        let well_formed = self
            .email
            .trim()
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !well_formed {
            return Err(QueryError::Validation("Invalid email address".to_string()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(QueryError::Validation(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LoginInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginInput")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
    #[serde(default)]
    pub issued_at: Option<String>,
}

/// Authentication status derived from the current-user query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<User>,
    pub is_loading: bool,
    pub error: Option<QueryError>,
    pub is_authenticated: bool,
}

impl From<&QueryResult<Option<User>>> for AuthState {
    fn from(result: &QueryResult<Option<User>>) -> Self {
        let user = result.data().cloned().flatten();
        Self {
            is_authenticated: user.is_some(),
            user,
            is_loading: result.is_loading(),
            error: result.error().cloned(),
        }
    }
}

pub fn current_user_key() -> CacheKey {
    cache_key!["currentUser"]
}

/// `GET /auth/me`. A 401 means nobody is signed in and resolves to `None`.
pub async fn fetch_current_user(transport: Arc<dyn Transport>) -> Result<Option<User>> {
    match fetch_json(transport.as_ref(), ApiRequest::get("/auth/me")).await {
        Ok(user) => Ok(Some(user)),
        Err(e) if e.is_unauthorized() => Ok(None),
        Err(e) => Err(e),
    }
}

/// `POST /auth/login`; seeds the current user from the response.
pub fn login_mutation(transport: Arc<dyn Transport>) -> Mutation<LoginInput, AuthResponse> {
    Mutation::new("login", move |input: LoginInput| {
        let transport = Arc::clone(&transport);
        async move {
            input.validate()?;
            let request = ApiRequest::post("/auth/login").with_json(&input)?;
            fetch_json(transport.as_ref(), request).await
        }
    })
    .invalidates(current_user_key())
    .seeds(|response: &AuthResponse| {
        vec![Seed::new(current_user_key(), Some(response.user.clone()))]
    })
}

/// `POST /auth/logout`; seeds the current user as signed out.
pub fn logout_mutation(transport: Arc<dyn Transport>) -> Mutation<(), ()> {
    Mutation::new("logout", move |()| {
        let transport = Arc::clone(&transport);
        async move {
            transport.request(ApiRequest::post("/auth/logout")).await?;
            Ok(())
        }
    })
    .invalidates(current_user_key())
    .seeds(|()| vec![Seed::new(current_user_key(), None::<User>)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryState;
    use serde_json::json;

    fn ada() -> User {
        User {
            id: 1,
            email: "ada@example.com".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            phone_number: None,
            roles: vec!["USER".into()],
            created_at: None,
        }
    }

    #[test]
    fn test_user_wire_format() {
        let user: User = serde_json::from_value(json!({
            "id": 1,
            "email": "ada@example.com",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "roles": ["USER"],
            "createdAt": "2024-01-01T00:00:00"
        }))
        .unwrap();
        assert_eq!(user.first_name, "Ada");
        assert_eq!(user.created_at.as_deref(), Some("2024-01-01T00:00:00"));
        assert!(user.has_role("USER"));
        assert_eq!(user.display_name(), "Ada Lovelace");
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let user = User {
            first_name: " ".into(),
            last_name: String::new(),
            ..ada()
        };
        assert_eq!(user.display_name(), "ada@example.com");
    }

    #[test]
    fn test_auth_response_type_field() {
        let response: AuthResponse = serde_json::from_value(json!({
            "token": "t",
            "type": "Bearer",
            "expiresIn": 3600,
            "user": {
                "id": 1,
                "email": "ada@example.com",
                "firstName": "Ada",
                "lastName": "Lovelace",
                "roles": []
            }
        }))
        .unwrap();
        assert_eq!(response.token_type, "Bearer");
        assert_eq!(response.expires_in, 3600);
        assert!(response.issued_at.is_none());
    }

    #[test]
    fn test_login_validation() {
        assert!(LoginInput::new("ada@example.com", "secret").validate().is_ok());

        for email in ["", "ada", "@example.com", "ada@"] {
            let result = LoginInput::new(email, "secret").validate();
            assert!(matches!(result, Err(QueryError::Validation(_))), "{email:?}");
        }

        let result = LoginInput::new("ada@example.com", "12345").validate();
        assert_eq!(
            result,
            Err(QueryError::Validation(
                "Password must be at least 6 characters".to_string()
            ))
        );
    }

    #[test]
    fn test_login_input_debug_hides_password() {
        let debug = format!("{:?}", LoginInput::new("ada@example.com", "hunter22"));
        assert!(!debug.contains("hunter22"));
    }

    #[test]
    fn test_auth_state_from_query() {
        let state = AuthState::from(&QueryResult::success(Some(ada())));
        assert!(state.is_authenticated);
        assert_eq!(state.user, Some(ada()));

        let state = AuthState::from(&QueryResult::success(None));
        assert!(!state.is_authenticated);
        assert!(!state.is_loading);

        let state = AuthState::from(&QueryResult {
            state: QueryState::Loading { previous: None },
        });
        assert!(state.is_loading);
        assert!(!state.is_authenticated);

        let state = AuthState::from(&QueryResult {
            state: QueryState::Error {
                error: QueryError::Network("down".into()),
                previous: Some(Some(ada())),
            },
        });
        assert!(state.is_authenticated);
        assert_eq!(state.error, Some(QueryError::Network("down".into())));
    }

    #[test]
    fn test_mutation_declarations() {
        struct Unused;

        #[async_trait::async_trait]
        impl Transport for Unused {
            async fn request(&self, _: ApiRequest) -> Result<serde_json::Value> {
                Err(QueryError::Network("unused".into()))
            }
        }

        let transport: Arc<dyn Transport> = Arc::new(Unused);
        let login = login_mutation(Arc::clone(&transport));
        assert_eq!(login.name(), "login");
        assert_eq!(login.invalidation_set(), &[current_user_key()]);

        let logout = logout_mutation(transport);
        assert_eq!(logout.invalidation_set(), &[current_user_key()]);
    }
}
