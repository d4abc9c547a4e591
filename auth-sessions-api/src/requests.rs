use serde::{Deserialize, Serialize};

// -------- REQUEST DTOs --------
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String, // Plain text
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String, // Plain text
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Descriptive metadata about the client that opened a session.
/// Shown in session listings, never used for authorization.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl DeviceContext {
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        Self {
            user_agent,
            ip_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_context_omits_missing_fields() {
        let device = DeviceContext::new(Some("firefox".to_string()), None);
        let json = serde_json::to_string(&device).unwrap();
        assert_eq!(json, r#"{"user_agent":"firefox"}"#);
    }

    #[test]
    fn device_context_defaults_when_fields_absent() {
        let device: DeviceContext = serde_json::from_str("{}").unwrap();
        assert_eq!(device, DeviceContext::default());
    }
}
