//! Evaluation context: user identification and targeting attributes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Identification and targeting attributes attached to evaluations and
/// analytics events.
///
/// A context is constructed by the consumer, optionally merged into the
/// client's global context, and cloned defensively on read. Attributes named
/// in `private_attributes` are stripped before anything leaves the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub anonymous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub private_attributes: HashSet<String>,
}

impl EvaluationContext {
    /// Context for a known user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            anonymous: false,
            ..Default::default()
        }
    }

    /// Context for an anonymous user with a synthesized id.
    pub fn anonymous() -> Self {
        Self {
            user_id: Some(uuid::Uuid::new_v4().to_string()),
            anonymous: true,
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_os(mut self, os: impl Into<String>) -> Self {
        self.os = Some(os.into());
        self
    }

    pub fn with_browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }

    pub fn with_custom(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn with_custom_map(mut self, attrs: HashMap<String, serde_json::Value>) -> Self {
        self.custom.extend(attrs);
        self
    }

    pub fn with_private_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.private_attributes.insert(attribute.into());
        self
    }

    pub fn with_private_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.private_attributes
            .extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Merges `other` over this context. Fields present in `other` win;
    /// custom attributes and private-attribute sets are unioned.
    pub fn merge(&self, other: &EvaluationContext) -> EvaluationContext {
        let mut merged = self.clone();

        if other.user_id.is_some() {
            merged.user_id = other.user_id.clone();
        }
        if other.email.is_some() {
            merged.email = other.email.clone();
        }
        if other.name.is_some() {
            merged.name = other.name.clone();
        }
        if other.country.is_some() {
            merged.country = other.country.clone();
        }
        if other.device_type.is_some() {
            merged.device_type = other.device_type.clone();
        }
        if other.os.is_some() {
            merged.os = other.os.clone();
        }
        if other.browser.is_some() {
            merged.browser = other.browser.clone();
        }
        if other.anonymous {
            merged.anonymous = true;
        }
        merged
            .custom
            .extend(other.custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
            .private_attributes
            .extend(other.private_attributes.iter().cloned());

        merged
    }

    /// A copy with every attribute named in `private_attributes` removed.
    /// Applied before contexts are serialized for transmission.
    pub fn strip_private_attributes(&self) -> EvaluationContext {
        let private = &self.private_attributes;
        let keep = |field: &str, value: &Option<String>| {
            if private.contains(field) {
                None
            } else {
                value.clone()
            }
        };

        EvaluationContext {
            user_id: self.user_id.clone(),
            anonymous: self.anonymous,
            email: keep("email", &self.email),
            name: keep("name", &self.name),
            country: keep("country", &self.country),
            device_type: keep("deviceType", &self.device_type),
            os: keep("os", &self.os),
            browser: keep("browser", &self.browser),
            custom: self
                .custom
                .iter()
                .filter(|(k, _)| !private.contains(k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            private_attributes: HashSet::new(),
        }
    }

    /// Flattens the context into a JSON map for request bodies.
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        if let Some(ref user_id) = self.user_id {
            map.insert("userId".to_string(), serde_json::json!(user_id));
        }
        if self.anonymous {
            map.insert("anonymous".to_string(), serde_json::json!(true));
        }
        if let Some(ref email) = self.email {
            map.insert("email".to_string(), serde_json::json!(email));
        }
        if let Some(ref name) = self.name {
            map.insert("name".to_string(), serde_json::json!(name));
        }
        if let Some(ref country) = self.country {
            map.insert("country".to_string(), serde_json::json!(country));
        }
        if let Some(ref device_type) = self.device_type {
            map.insert("deviceType".to_string(), serde_json::json!(device_type));
        }
        if let Some(ref os) = self.os {
            map.insert("os".to_string(), serde_json::json!(os));
        }
        if let Some(ref browser) = self.browser {
            map.insert("browser".to_string(), serde_json::json!(browser));
        }
        if !self.custom.is_empty() {
            map.insert(
                "custom".to_string(),
                serde_json::to_value(&self.custom).unwrap_or(serde_json::Value::Null),
            );
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_user_is_not_anonymous() {
        let ctx = EvaluationContext::new("user-1");
        assert_eq!(ctx.user_id.as_deref(), Some("user-1"));
        assert!(!ctx.anonymous);
    }

    #[test]
    fn anonymous_synthesizes_user_id() {
        let ctx = EvaluationContext::anonymous();
        assert!(ctx.anonymous);
        assert!(ctx.user_id.is_some());

        let other = EvaluationContext::anonymous();
        assert_ne!(ctx.user_id, other.user_id);
    }

    #[test]
    fn merge_other_wins() {
        let base = EvaluationContext::new("user-1")
            .with_country("DE")
            .with_custom("plan", "free");
        let overlay = EvaluationContext::new("user-2").with_custom("beta", true);

        let merged = base.merge(&overlay);
        assert_eq!(merged.user_id.as_deref(), Some("user-2"));
        assert_eq!(merged.country.as_deref(), Some("DE"));
        assert_eq!(merged.custom.get("plan"), Some(&serde_json::json!("free")));
        assert_eq!(merged.custom.get("beta"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn strip_removes_named_custom_attributes() {
        let ctx = EvaluationContext::new("user-1")
            .with_custom("ssn", "123-45-6789")
            .with_custom("plan", "premium")
            .with_private_attribute("ssn");

        let stripped = ctx.strip_private_attributes();
        assert!(!stripped.custom.contains_key("ssn"));
        assert!(stripped.custom.contains_key("plan"));
    }

    #[test]
    fn strip_removes_named_well_known_fields() {
        let ctx = EvaluationContext::new("user-1")
            .with_email("a@example.com")
            .with_device_type("mobile")
            .with_private_attributes(["email", "deviceType"]);

        let stripped = ctx.strip_private_attributes();
        assert!(stripped.email.is_none());
        assert!(stripped.device_type.is_none());
        assert_eq!(stripped.user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn to_map_omits_absent_fields() {
        let map = EvaluationContext::new("user-1").with_os("linux").to_map();
        assert_eq!(map.get("userId"), Some(&serde_json::json!("user-1")));
        assert_eq!(map.get("os"), Some(&serde_json::json!("linux")));
        assert!(!map.contains_key("email"));
        assert!(!map.contains_key("custom"));
    }
}
